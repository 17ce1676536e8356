use std::{fs::OpenOptions, path::Path, sync::Arc};

use anyhow::{Context, Result};
use chrono::{Local, SecondsFormat};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only capture logs: one file for every request the portal sees,
/// one for accepted credential submissions.
#[derive(Clone)]
pub struct CaptureLog {
    requests: Arc<Mutex<File>>,
    credentials: Arc<Mutex<File>>,
}

impl CaptureLog {
    pub fn new(capture_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(capture_dir).context("creating portal capture directory")?;

        let requests =
            open_append(capture_dir.join("requests.log")).context("opening request log")?;
        let credentials =
            open_append(capture_dir.join("credentials.log")).context("opening credential log")?;

        Ok(Self {
            requests: Arc::new(Mutex::new(File::from_std(requests))),
            credentials: Arc::new(Mutex::new(File::from_std(credentials))),
        })
    }

    pub async fn log_request_line(&self, line: &str) -> Result<()> {
        let mut file = self.requests.lock().await;
        file.write_all(line.as_bytes())
            .await
            .context("writing request log")?;
        file.flush().await.context("flushing request log")?;
        Ok(())
    }

    pub async fn log_credential_line(&self, line: &str) -> Result<()> {
        let mut file = self.credentials.lock().await;
        file.write_all(line.as_bytes())
            .await
            .context("writing credential log")?;
        file.flush().await.context("flushing credential log")?;
        Ok(())
    }
}

pub fn format_request_line(ip: &str, method: &str, path: &str, host: &str) -> String {
    format_request_line_at(&timestamp_now(), ip, method, path, host)
}

pub fn format_credential_line(ip: &str, user: &str, pass: &str) -> String {
    format_credential_line_at(&timestamp_now(), ip, user, pass)
}

pub fn format_request_line_at(
    timestamp: &str,
    ip: &str,
    method: &str,
    path: &str,
    host: &str,
) -> String {
    format!("[{timestamp}] ip={ip} method={method} path=\"{path}\" host=\"{host}\"\n")
}

pub fn format_credential_line_at(timestamp: &str, ip: &str, user: &str, pass: &str) -> String {
    format!("[{timestamp}] ip={ip} user=\"{user}\" pass=\"{pass}\"\n")
}

fn timestamp_now() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn open_append(path: impl AsRef<Path>) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("opening log file")
}
