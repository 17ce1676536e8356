use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tempfile::TempDir;

use netlure_capture::{CapturedCredential, CredentialStore};
use netlure_core::config::Config;
use netlure_core::controller::{ConsoleCommand, ControlEvent, ModeController};
use netlure_core::radio::RadioControl;
use netlure_core::survey::SurveyedNetwork;
use netlure_core::sync::{JoinOutcome, SyncAgent, SyncConfig};

struct FakeRadio {
    join_succeeds: bool,
    connected: AtomicBool,
    ap_active: AtomicBool,
}

impl FakeRadio {
    fn new(join_succeeds: bool) -> Self {
        Self {
            join_succeeds,
            connected: AtomicBool::new(false),
            ap_active: AtomicBool::new(false),
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
        self.connected.store(false, Ordering::SeqCst);
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
        Ok(Vec::new())
    }
}

/// Script entry that makes the collector read the request and then hang
/// up without answering, so the client sees a transport failure.
const DROP_CONNECTION: u16 = 0;

struct Collector {
    addr: SocketAddr,
    handle: thread::JoinHandle<()>,
    bodies: Arc<Mutex<Vec<String>>>,
}

impl Collector {
    fn url(&self) -> String {
        format!("http://{}/creds", self.addr)
    }

    fn received(self) -> Vec<String> {
        self.handle.join().expect("collector thread");
        Arc::try_unwrap(self.bodies)
            .expect("no outstanding body references")
            .into_inner()
            .expect("bodies lock")
    }
}

/// Serves one scripted status code per connection, then exits. The
/// client sends Connection: close responses back-to-back, so each
/// record delivery is one accept. A `DROP_CONNECTION` entry closes the
/// socket without a response.
fn start_collector(script: Vec<u16>) -> Collector {
    let listener = TcpListener::bind("127.0.0.1:0").expect("port bindable");
    let addr = listener.local_addr().expect("address available");
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&bodies);

    let handle = thread::spawn(move || {
        for status in script {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let body = read_request_body(&mut stream);
            sink.lock().expect("bodies lock").push(body);

            if status == DROP_CONNECTION {
                continue;
            }

            let reason = if status == 200 {
                "OK"
            } else {
                "Internal Server Error"
            };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    Collector {
        addr,
        handle,
        bodies,
    }
}

fn read_request_body(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];

    let header_end = loop {
        match stream.read(&mut buf) {
            Ok(0) => return String::new(),
            Ok(n) => {
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            }
            Err(_) => return String::new(),
        }
    };

    let headers = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let content_length = headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&raw[header_end..]).to_string()
}

fn sync_config(collector_url: String) -> SyncConfig {
    SyncConfig {
        collector_url,
        upstream_ssid: "Uplink".to_string(),
        upstream_psk: Some("upl1nkpass".to_string()),
        join_attempts: 3,
        join_poll_interval: Duration::from_millis(1),
        record_pacing: Duration::from_millis(1),
        request_timeout: Duration::from_secs(1),
    }
}

fn seeded_store(count: usize) -> Arc<CredentialStore> {
    let store = Arc::new(CredentialStore::with_default_capacity());
    for i in 0..count {
        store.insert(CapturedCredential::new(
            format!("user{i}"),
            format!("pass{i}"),
            format!("10.42.0.{}", i + 2),
            1000 + i as u64 * 500,
        ));
    }
    store
}

#[test]
fn delivered_records_are_cleared_after_a_full_pass() {
    let collector = start_collector(vec![200, 200, 200]);
    let store = seeded_store(3);
    let radio = Arc::new(FakeRadio::new(true));
    let agent = SyncAgent::new(sync_config(collector.url()), Arc::clone(&store), radio)
        .expect("agent builds");

    let report = agent.sync_all();
    assert_eq!(report.join, JoinOutcome::Connected);
    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 3);
    assert!(report.fully_delivered());
    assert!(store.is_empty());

    let bodies = collector.received();
    assert_eq!(bodies.len(), 3);
    let first: serde_json::Value = serde_json::from_str(&bodies[0]).expect("json body");
    assert_eq!(first["username"], "user0");
    assert_eq!(first["password"], "pass0");
    assert_eq!(first["ip"], "10.42.0.2");
    assert_eq!(first["timestamp"], 1000);
}

#[test]
fn error_statuses_still_count_as_delivered() {
    let collector = start_collector(vec![200, 500, 200]);
    let store = seeded_store(3);
    let radio = Arc::new(FakeRadio::new(true));
    let agent = SyncAgent::new(sync_config(collector.url()), Arc::clone(&store), radio)
        .expect("agent builds");

    let report = agent.sync_all();
    assert_eq!(report.join, JoinOutcome::Connected);
    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 3);
    assert!(report.fully_delivered());

    // The collector answered every request, so the batch is handed off
    // and cleared even though one answer was a 500.
    assert!(store.is_empty());
    assert_eq!(collector.received().len(), 3);
}

#[test]
fn a_transport_failure_keeps_the_whole_batch() {
    let collector = start_collector(vec![200, DROP_CONNECTION, 200]);
    let store = seeded_store(3);
    let radio = Arc::new(FakeRadio::new(true));
    let agent = SyncAgent::new(sync_config(collector.url()), Arc::clone(&store), radio)
        .expect("agent builds");

    let report = agent.sync_all();
    assert_eq!(report.join, JoinOutcome::Connected);
    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 2);
    assert!(!report.fully_delivered());

    // Nothing is dropped until a pass lands every record.
    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[0].username, "user0");
    assert_eq!(snapshot[2].username, "user2");

    assert_eq!(collector.received().len(), 3);
}

#[test]
fn empty_store_skips_the_join_entirely() {
    let collector = start_collector(Vec::new());
    let store = Arc::new(CredentialStore::with_default_capacity());
    let radio = Arc::new(FakeRadio::new(true));
    let agent = SyncAgent::new(sync_config(collector.url()), Arc::clone(&store), radio)
        .expect("agent builds");

    let report = agent.sync_all();
    assert_eq!(report.join, JoinOutcome::NotAttempted);
    assert_eq!(report.attempted, 0);
    assert!(collector.received().is_empty());
}

#[test]
fn blank_collector_url_keeps_records_local() {
    let store = seeded_store(2);
    let radio = Arc::new(FakeRadio::new(true));
    let agent =
        SyncAgent::new(sync_config(String::new()), Arc::clone(&store), radio).expect("agent builds");

    let report = agent.sync_all();
    assert_eq!(report.join, JoinOutcome::NotAttempted);
    assert_eq!(report.delivered, 0);
    assert_eq!(store.len(), 2);
}

#[test]
fn failed_join_delivers_nothing() {
    let collector = start_collector(Vec::new());
    let store = seeded_store(2);
    let radio = Arc::new(FakeRadio::new(false));
    let agent = SyncAgent::new(sync_config(collector.url()), Arc::clone(&store), radio)
        .expect("agent builds");

    let report = agent.sync_all();
    assert_eq!(report.join, JoinOutcome::Failed);
    assert_eq!(report.attempted, 0);
    assert_eq!(store.len(), 2);
    assert!(collector.received().is_empty());
}

#[test]
fn sync_now_command_drains_the_store_through_the_controller() {
    let collector = start_collector(vec![200, 200]);
    let tmp = TempDir::new().expect("tempdir");

    let mut config = Config::from_env();
    config.interface = "test0".to_string();
    config.portal_addr = std::net::Ipv4Addr::LOCALHOST;
    config.portal_port = 0;
    config.dns_port = 0;
    config.upstream_ssid = "Uplink".to_string();
    config.collector_url = collector.url();
    config.state_dir = tmp.path().to_path_buf();
    config.join_attempts = 1;
    config.join_poll_interval = Duration::from_millis(1);
    config.record_pacing = Duration::from_millis(1);
    config.request_timeout = Duration::from_secs(1);
    config.bind_to_device = false;

    let store = seeded_store(2);
    let radio = Arc::new(FakeRadio::new(true));
    let (tx, rx) = mpsc::channel();
    let controller = ModeController::new(
        config,
        Arc::clone(&store),
        radio,
        rx,
        tx.clone(),
        Instant::now(),
    )
    .expect("controller builds");

    let handle = thread::spawn(move || controller.run());
    tx.send(ControlEvent::Command(ConsoleCommand::SyncNow))
        .expect("send sync command");
    tx.send(ControlEvent::Shutdown).expect("send shutdown");

    handle
        .join()
        .expect("controller thread")
        .expect("controller run");
    assert!(store.is_empty());
    assert_eq!(collector.received().len(), 2);
}
