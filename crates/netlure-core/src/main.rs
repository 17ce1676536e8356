#![deny(unsafe_op_in_unsafe_fn)]
use std::panic;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use netlure_capture::CredentialStore;
use netlure_core::config::Config;
use netlure_core::console;
use netlure_core::controller::{ControlEvent, ModeController};
use netlure_core::logging;
use netlure_core::radio::NetworkManagerRadio;

#[derive(Parser, Debug)]
#[command(
    name = "netlure",
    author,
    version,
    about = "Wireless survey and captive portal credential appliance"
)]
struct Cli {
    /// Wireless interface the portal and surveys run on
    #[arg(long)]
    interface: Option<String>,

    /// Collector endpoint buffered credentials are delivered to
    #[arg(long = "collector-url")]
    collector_url: Option<String>,

    /// Directory for capture records and rotated service logs
    #[arg(long = "state-dir")]
    state_dir: Option<PathBuf>,

    /// Disable the interactive console (service deployments)
    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(interface) = cli.interface {
        config.interface = interface;
    }
    if let Some(url) = cli.collector_url {
        config.collector_url = url;
    }
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }
    config.validate()?;

    let _logging_guards = logging::init_logging(&config.state_dir)?;
    install_panic_hook();

    info!(
        interface = %config.interface,
        portal_ssid = %config.portal_ssid,
        "netlure starting"
    );

    let epoch = Instant::now();
    let store = Arc::new(CredentialStore::new(config.store_capacity));
    let radio = Arc::new(
        NetworkManagerRadio::new(config.interface.clone())
            .context("connecting to NetworkManager")?,
    );

    let (tx, rx) = mpsc::channel();
    spawn_signal_listener(tx.clone());
    let _console = if cli.headless {
        None
    } else {
        println!("{}", console::MENU);
        Some(console::spawn_console(tx.clone())?)
    };

    let controller = ModeController::new(config, store, radio, rx, tx, epoch)?;
    controller.run()
}

/// Waits for SIGTERM or SIGINT on a dedicated thread and tells the
/// controller to shut down. Registration failures are logged and leave
/// the process stoppable only by SIGKILL, so they are worth surfacing.
fn spawn_signal_listener(tx: mpsc::Sender<ControlEvent>) {
    let spawned = std::thread::Builder::new()
        .name("netlure-signals".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!("Signal listener runtime failed: {err}");
                    return;
                }
            };

            runtime.block_on(async {
                use tokio::signal::unix::{signal, SignalKind};

                let mut sigterm = match signal(SignalKind::terminate()) {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!("Failed to register SIGTERM handler: {err}");
                        return;
                    }
                };
                let mut sigint = match signal(SignalKind::interrupt()) {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!("Failed to register SIGINT handler: {err}");
                        return;
                    }
                };

                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    _ = sigint.recv() => info!("Received SIGINT, shutting down"),
                }
            });

            let _ = tx.send(ControlEvent::Shutdown);
        });

    if let Err(err) = spawned {
        warn!("Failed to spawn signal listener: {err}");
    }
}

/// Logs panics through tracing before the default hook runs, so crashes
/// under systemd leave a trace in the rotated logs.
fn install_panic_hook() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        error!(
            target: "netlure::panic",
            location = %location,
            message = %message,
            "PANIC: process panicked"
        );

        let backtrace = std::backtrace::Backtrace::capture();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            error!(target: "netlure::panic", backtrace = %backtrace, "Panic backtrace");
        }

        default_hook(panic_info);
    }));
}
