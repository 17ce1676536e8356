use std::{net::Ipv4Addr, path::PathBuf, time::Duration};

#[derive(Clone, Debug)]
pub struct PortalConfig {
    /// Interface the listener is tied to when `bind_to_device` is set.
    pub interface: String,
    /// Address the portal serves from; also the address clients are
    /// redirected to and the host requests are matched against.
    pub listen_ip: Ipv4Addr,
    /// Port 80 in deployment; 0 binds an ephemeral port for tests.
    pub listen_port: u16,
    /// Directory for the request and credential capture logs.
    pub capture_dir: PathBuf,
    pub max_body_bytes: usize,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    pub bind_to_device: bool,
}

impl PortalConfig {
    pub fn new(listen_ip: Ipv4Addr, listen_port: u16, capture_dir: PathBuf) -> Self {
        Self {
            interface: String::new(),
            listen_ip,
            listen_port,
            capture_dir,
            max_body_bytes: 16 * 1024,
            max_concurrency: 64,
            request_timeout: Duration::from_secs(10),
            bind_to_device: false,
        }
    }
}
