use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};

use netlure_capture::CredentialStore;

use crate::config::PortalConfig;
use crate::logging::CaptureLog;
use crate::server::{build_router, run_server, PortalContext, TriggerHook};

/// A running portal. Dropping the handle without calling [`stop`]
/// leaves the server thread alive until the process exits; callers that
/// flip the portal on and off must stop it explicitly.
///
/// [`stop`]: PortalServer::stop
pub struct PortalServer {
    local_addr: SocketAddr,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PortalServer {
    /// Binds the listener, then serves the router from a dedicated
    /// thread hosting a single-worker runtime. Returns once the
    /// listener is bound, so a `local_addr` port of 0 in the config has
    /// already been resolved to the real port.
    pub fn start(
        cfg: &PortalConfig,
        store: Arc<CredentialStore>,
        notify: TriggerHook,
        epoch: Instant,
    ) -> Result<Self> {
        validate_config(cfg)?;

        let log = CaptureLog::new(&cfg.capture_dir)?;
        let listener = build_listener(cfg)?;
        let local_addr = listener
            .local_addr()
            .context("reading portal listener address")?;

        let (shutdown, shutdown_rx) = tokio::sync::oneshot::channel();
        let ctx = PortalContext::new(cfg, store, log, notify, epoch);
        let app = build_router(cfg, ctx);

        tracing::info!("Starting portal server on {local_addr}");

        let thread = std::thread::Builder::new()
            .name("netlure-portal".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        tracing::error!("failed to build portal runtime: {err}");
                        return;
                    }
                };

                let result = runtime.block_on(run_server(listener, app, shutdown_rx));
                if let Err(err) = result {
                    tracing::error!("portal server exited with error: {err:#}");
                }
            })
            .context("spawning portal server thread")?;

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    /// Address the portal actually listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals graceful shutdown and waits for the server thread to
    /// finish. In-flight requests complete before this returns.
    pub fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::info!("portal server stopped");
    }
}

fn validate_config(cfg: &PortalConfig) -> Result<()> {
    if cfg.listen_ip.is_unspecified() {
        bail!("portal listen_ip must not be 0.0.0.0");
    }
    if cfg.max_body_bytes == 0 {
        bail!("portal max_body_bytes must be non-zero");
    }
    if cfg.max_concurrency == 0 {
        bail!("portal max_concurrency must be non-zero");
    }
    if cfg.bind_to_device && cfg.interface.trim().is_empty() {
        bail!("portal interface must be set when bind_to_device is enabled");
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn build_listener(cfg: &PortalConfig) -> Result<std::net::TcpListener> {
    use std::ffi::CString;
    use std::os::unix::io::AsRawFd;

    use anyhow::anyhow;
    use socket2::{Domain, Protocol, Socket, Type};

    let addr = SocketAddr::new(IpAddr::V4(cfg.listen_ip), cfg.listen_port);

    if !cfg.bind_to_device {
        let listener = std::net::TcpListener::bind(addr)
            .with_context(|| format!("binding portal listener to {addr}"))?;
        listener
            .set_nonblocking(true)
            .context("setting portal listener nonblocking")?;
        return Ok(listener);
    }

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .context("creating portal socket")?;
    socket
        .set_reuse_address(true)
        .context("setting portal socket reuse address")?;

    let iface = CString::new(cfg.interface.clone()).context("invalid interface name")?;
    let result = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            iface.as_ptr().cast::<libc::c_void>(),
            iface.as_bytes_with_nul().len() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(anyhow!(
            "setting SO_BINDTODEVICE failed: {}",
            std::io::Error::last_os_error()
        ));
    }

    socket
        .bind(&socket2::SockAddr::from(addr))
        .with_context(|| format!("binding portal listener to {addr}"))?;
    socket.listen(128).context("listening on portal socket")?;

    let listener: std::net::TcpListener = socket.into();
    listener
        .set_nonblocking(true)
        .context("setting portal listener nonblocking")?;
    Ok(listener)
}

#[cfg(not(target_os = "linux"))]
fn build_listener(cfg: &PortalConfig) -> Result<std::net::TcpListener> {
    if cfg.bind_to_device {
        bail!("portal bind_to_device is only supported on linux");
    }

    let addr = SocketAddr::new(IpAddr::V4(cfg.listen_ip), cfg.listen_port);
    let listener = std::net::TcpListener::bind(addr)
        .with_context(|| format!("binding portal listener to {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("setting portal listener nonblocking")?;
    Ok(listener)
}
