use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::HijackError;
use crate::wire::{decode_query, encode_answer, MAX_PACKET_SIZE};
use crate::Result;

pub const DNS_PORT: u16 = 53;

const DEFAULT_TTL: u32 = 300;

/// Read timeout on the service socket; bounds how long stop() waits for
/// the thread to notice the flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct HijackConfig {
    /// Interface the resolver serves; used for SO_BINDTODEVICE when
    /// `bind_to_device` is set and for log context otherwise.
    pub interface: String,
    pub listen: SocketAddr,
    /// Address every query resolves to.
    pub spoof_addr: Ipv4Addr,
    pub ttl: u32,
    pub bind_to_device: bool,
}

impl Default for HijackConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DNS_PORT)),
            spoof_addr: Ipv4Addr::UNSPECIFIED,
            ttl: DEFAULT_TTL,
            bind_to_device: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HijackStats {
    pub queries: u64,
    pub answered: u64,
}

/// Handle to the running wildcard resolver. Dropping it stops the
/// service thread.
pub struct NameHijacker {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    queries: Arc<AtomicU64>,
    answered: Arc<AtomicU64>,
    thread: Option<thread::JoinHandle<()>>,
}

impl NameHijacker {
    /// Binds the resolver socket and spawns the service thread.
    pub fn start(config: HijackConfig) -> Result<Self> {
        if config.spoof_addr.is_unspecified() {
            return Err(HijackError::InvalidConfig(
                "spoof address must be set".to_string(),
            ));
        }

        let socket = bind_socket(&config)?;
        socket
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(|source| HijackError::Bind {
                addr: config.listen,
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| HijackError::Bind {
            addr: config.listen,
            source,
        })?;

        let running = Arc::new(AtomicBool::new(true));
        let queries = Arc::new(AtomicU64::new(0));
        let answered = Arc::new(AtomicU64::new(0));

        let thread = {
            let running = Arc::clone(&running);
            let queries = Arc::clone(&queries);
            let answered = Arc::clone(&answered);
            thread::Builder::new()
                .name("netlure-dns".to_string())
                .spawn(move || serve(socket, config, running, queries, answered))
                .map_err(HijackError::Spawn)?
        };

        tracing::info!("wildcard resolver listening on {local_addr}");

        Ok(Self {
            local_addr,
            running,
            queries,
            answered,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> HijackStats {
        HijackStats {
            queries: self.queries.load(Ordering::SeqCst),
            answered: self.answered.load(Ordering::SeqCst),
        }
    }

    /// Signals the service thread and joins it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for NameHijacker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(
    socket: UdpSocket,
    config: HijackConfig,
    running: Arc<AtomicBool>,
    queries: Arc<AtomicU64>,
    answered: Arc<AtomicU64>,
) {
    let mut buffer = [0u8; MAX_PACKET_SIZE];

    while running.load(Ordering::SeqCst) {
        let (len, client) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                tracing::error!("resolver receive failed on {}: {err}", config.interface);
                running.store(false, Ordering::SeqCst);
                break;
            }
        };

        queries.fetch_add(1, Ordering::SeqCst);

        let query = match decode_query(&buffer[..len]) {
            Ok(query) => query,
            Err(err) => {
                // Malformed input is dropped, never answered.
                tracing::debug!("dropping packet from {client}: {err}");
                continue;
            }
        };

        tracing::trace!("query from {client}: {} (type {})", query.name, query.qtype);

        let response = encode_answer(&query, config.spoof_addr, config.ttl);
        match socket.send_to(&response, client) {
            Ok(_) => {
                answered.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                tracing::warn!("resolver send to {client} failed: {err}");
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn bind_socket(config: &HijackConfig) -> Result<UdpSocket> {
    use std::os::unix::io::AsRawFd;

    use socket2::{Domain, Protocol, Socket, Type};

    if !config.bind_to_device {
        return UdpSocket::bind(config.listen).map_err(|source| HijackError::Bind {
            addr: config.listen,
            source,
        });
    }

    if config.interface.trim().is_empty() {
        return Err(HijackError::InvalidConfig(
            "bind_to_device requires an interface name".to_string(),
        ));
    }

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(
        |source| HijackError::Bind {
            addr: config.listen,
            source,
        },
    )?;
    socket
        .set_reuse_address(true)
        .map_err(|source| HijackError::Bind {
            addr: config.listen,
            source,
        })?;

    let iface = config.interface.as_bytes();
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            iface.as_ptr().cast::<libc::c_void>(),
            iface.len() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(HijackError::BindToDevice {
            interface: config.interface.clone(),
            source: std::io::Error::last_os_error(),
        });
    }

    socket
        .bind(&socket2::SockAddr::from(config.listen))
        .map_err(|source| HijackError::Bind {
            addr: config.listen,
            source,
        })?;

    Ok(socket.into())
}

#[cfg(not(target_os = "linux"))]
fn bind_socket(config: &HijackConfig) -> Result<UdpSocket> {
    if config.bind_to_device {
        return Err(HijackError::InvalidConfig(
            "bind_to_device is only supported on linux".to_string(),
        ));
    }

    UdpSocket::bind(config.listen).map_err(|source| HijackError::Bind {
        addr: config.listen,
        source,
    })
}
