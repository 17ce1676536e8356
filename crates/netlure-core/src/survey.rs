use std::fmt::Write;

/// Closed set of security configurations a surveyed network can
/// advertise. Anything the radio cannot classify lands on `Unknown`
/// instead of leaking backend-specific flag words upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    Open,
    Wep,
    Wpa,
    Wpa2,
    WpaWpa2Mixed,
    Wpa2Enterprise,
    Wpa3,
    Unknown,
}

impl CipherSuite {
    pub fn label(self) -> &'static str {
        match self {
            CipherSuite::Open => "OPEN",
            CipherSuite::Wep => "WEP",
            CipherSuite::Wpa => "WPA",
            CipherSuite::Wpa2 => "WPA2",
            CipherSuite::WpaWpa2Mixed => "WPA/WPA2",
            CipherSuite::Wpa2Enterprise => "WPA2 Enterprise",
            CipherSuite::Wpa3 => "WPA3",
            CipherSuite::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurveyedNetwork {
    pub ssid: String,
    pub bssid: String,
    pub signal_dbm: i32,
    pub channel: u32,
    pub cipher: CipherSuite,
}

/// Signals above this count as "strong" in the security summary.
pub const STRONG_SIGNAL_DBM: i32 = -50;

/// Counts per security class over one survey. Enterprise and unknown
/// networks contribute to the total but to no class bucket.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SecuritySummary {
    pub total: usize,
    pub open: usize,
    pub wep: usize,
    pub wpa: usize,
    pub wpa2: usize,
    pub wpa3: usize,
    pub strong_signals: usize,
}

impl SecuritySummary {
    pub fn from_networks(networks: &[SurveyedNetwork]) -> Self {
        let mut summary = Self {
            total: networks.len(),
            ..Self::default()
        };
        for network in networks {
            match network.cipher {
                CipherSuite::Open => summary.open += 1,
                CipherSuite::Wep => summary.wep += 1,
                CipherSuite::Wpa => summary.wpa += 1,
                CipherSuite::Wpa2 | CipherSuite::WpaWpa2Mixed => summary.wpa2 += 1,
                CipherSuite::Wpa3 => summary.wpa3 += 1,
                CipherSuite::Wpa2Enterprise | CipherSuite::Unknown => {}
            }
            if network.signal_dbm > STRONG_SIGNAL_DBM {
                summary.strong_signals += 1;
            }
        }
        summary
    }
}

/// One row per network, the compact form logged after each survey pass.
pub fn render_survey_table(networks: &[SurveyedNetwork]) -> String {
    if networks.is_empty() {
        return "No networks found\n".to_string();
    }

    let mut out = String::new();
    out.push_str("ID | SSID                     | RSSI | CH | Security\n");
    out.push_str("---|--------------------------|------|----|----------\n");
    for (index, network) in networks.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:2} | {:<24} | {:4} | {:2} | {}",
            index + 1,
            network.ssid,
            network.signal_dbm,
            network.channel,
            network.cipher.label()
        );
    }
    out
}

/// The verbose per-network listing behind the operator's survey command.
pub fn render_network_details(networks: &[SurveyedNetwork]) -> String {
    if networks.is_empty() {
        return "No networks surveyed yet. Enter scanning mode to survey.\n".to_string();
    }

    let mut out = String::new();
    for (index, network) in networks.iter().enumerate() {
        let _ = writeln!(out, "Network {}:", index + 1);
        let _ = writeln!(out, "  SSID: {}", network.ssid);
        let _ = writeln!(out, "  BSSID: {}", network.bssid);
        let _ = writeln!(out, "  Signal: {} dBm", network.signal_dbm);
        let _ = writeln!(out, "  Channel: {}", network.channel);
        let _ = writeln!(out, "  Security: {}", network.cipher.label());
        out.push('\n');
    }
    out
}

pub fn render_security_report(summary: &SecuritySummary) -> String {
    if summary.total == 0 {
        return "No networks to analyze. Run a survey first.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "Networks analyzed: {}", summary.total);
    let _ = writeln!(out, "Open networks (VULNERABLE): {}", summary.open);
    let _ = writeln!(out, "WEP networks (VULNERABLE): {}", summary.wep);
    let _ = writeln!(out, "WPA networks (WEAK): {}", summary.wpa);
    let _ = writeln!(out, "WPA2 networks (GOOD): {}", summary.wpa2);
    let _ = writeln!(out, "WPA3 networks (EXCELLENT): {}", summary.wpa3);
    let _ = writeln!(
        out,
        "Strong signals (> {} dBm): {}",
        STRONG_SIGNAL_DBM, summary.strong_signals
    );

    out.push_str("\nRecommendations:\n");
    if summary.open > 0 {
        out.push_str("- Open networks detected! Configure WPA2/WPA3 passwords\n");
    }
    if summary.wep > 0 {
        out.push_str("- WEP networks detected! Upgrade to WPA2/WPA3\n");
    }
    if summary.wpa > 0 {
        out.push_str("- WPA networks detected! Upgrade to WPA2/WPA3\n");
    }
    out.push_str("- Use strong passphrases (12+ characters)\n");
    out.push_str("- Keep WPS disabled\n");
    out.push_str("- Prefer WPA3 where available\n");
    out.push_str("- Consider hiding SSIDs of sensitive networks\n");
    out
}
