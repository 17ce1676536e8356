use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, Value};
use zbus::Connection;

use super::RadioControl;
use crate::survey::{CipherSuite, SurveyedNetwork};

const NM_SERVICE: &str = "org.freedesktop.NetworkManager";
const NM_PATH: &str = "/org/freedesktop/NetworkManager";
const NM_IFACE: &str = "org.freedesktop.NetworkManager";
const DEVICE_IFACE: &str = "org.freedesktop.NetworkManager.Device";
const WIRELESS_IFACE: &str = "org.freedesktop.NetworkManager.Device.Wireless";
const ACCESS_POINT_IFACE: &str = "org.freedesktop.NetworkManager.AccessPoint";
const SETTINGS_CONNECTION_IFACE: &str = "org.freedesktop.NetworkManager.Settings.Connection";

const AP_PROFILE_ID: &str = "netlure-portal";
const UPLINK_PROFILE_ID: &str = "netlure-uplink";

const AP_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(15);
const SCAN_SETTLE: Duration = Duration::from_secs(2);

// 802.11 access point flag bits as NetworkManager reports them.
const AP_FLAGS_PRIVACY: u32 = 0x1;
const SEC_KEY_MGMT_802_1X: u32 = 0x200;
const SEC_KEY_MGMT_SAE: u32 = 0x400;

/// NetworkManager device states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NmDeviceState {
    Unknown = 0,
    Unmanaged = 10,
    Unavailable = 20,
    Disconnected = 30,
    Prepare = 40,
    Config = 50,
    NeedAuth = 60,
    IpConfig = 70,
    IpCheck = 80,
    Secondaries = 90,
    Activated = 100,
    Deactivating = 110,
    Failed = 120,
}

impl NmDeviceState {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Unknown,
            10 => Self::Unmanaged,
            20 => Self::Unavailable,
            30 => Self::Disconnected,
            40 => Self::Prepare,
            50 => Self::Config,
            60 => Self::NeedAuth,
            70 => Self::IpConfig,
            80 => Self::IpCheck,
            90 => Self::Secondaries,
            100 => Self::Activated,
            110 => Self::Deactivating,
            120 => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Unmanaged => "unmanaged",
            Self::Unavailable => "unavailable",
            Self::Disconnected => "disconnected",
            Self::Prepare => "preparing",
            Self::Config => "configuring",
            Self::NeedAuth => "need-auth",
            Self::IpConfig => "ip-config",
            Self::IpCheck => "ip-check",
            Self::Secondaries => "secondaries",
            Self::Activated => "activated",
            Self::Deactivating => "deactivating",
            Self::Failed => "failed",
        }
    }
}

/// Paths of a profile this radio activated: the saved settings object
/// and the active-connection object. Both are cleaned up on stop so
/// repeated mode flips do not litter NetworkManager with profiles.
struct ActiveProfile {
    settings: OwnedObjectPath,
    active: OwnedObjectPath,
}

/// Radio control over the NetworkManager system D-Bus API.
///
/// Calls are synchronous; a private current-thread runtime drives the
/// bus I/O. Only the controller thread talks to the radio.
pub struct NetworkManagerRadio {
    interface: String,
    runtime: tokio::runtime::Runtime,
    access_point: Mutex<Option<ActiveProfile>>,
    uplink: Mutex<Option<ActiveProfile>>,
}

impl NetworkManagerRadio {
    pub fn new(interface: impl Into<String>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("building radio runtime")?;

        Ok(Self {
            interface: interface.into(),
            runtime,
            access_point: Mutex::new(None),
            uplink: Mutex::new(None),
        })
    }

    async fn activate_access_point(
        &self,
        ssid: &str,
        passphrase: Option<&str>,
    ) -> Result<ActiveProfile> {
        let connection = system_bus().await?;
        let device = device_path(&connection, &self.interface).await?;

        let mut settings: HashMap<String, HashMap<String, Value>> = HashMap::new();

        let mut conn_map = HashMap::new();
        conn_map.insert("type".to_string(), Value::new("802-11-wireless"));
        conn_map.insert("id".to_string(), Value::new(AP_PROFILE_ID));
        conn_map.insert(
            "uuid".to_string(),
            Value::new(uuid::Uuid::new_v4().to_string()),
        );
        conn_map.insert("autoconnect".to_string(), Value::new(false));
        settings.insert("connection".to_string(), conn_map);

        let mut wireless_map = HashMap::new();
        wireless_map.insert("ssid".to_string(), Value::new(ssid.as_bytes()));
        wireless_map.insert("mode".to_string(), Value::new("ap"));
        wireless_map.insert("band".to_string(), Value::new("bg"));
        settings.insert("802-11-wireless".to_string(), wireless_map);

        if let Some(pass) = passphrase {
            if !pass.is_empty() {
                let mut security_map = HashMap::new();
                security_map.insert("key-mgmt".to_string(), Value::new("wpa-psk"));
                security_map.insert("psk".to_string(), Value::new(pass));
                settings.insert("802-11-wireless-security".to_string(), security_map);
            }
        }

        // Shared mode hands out leases on the portal subnet and NATs
        // nothing anywhere useful; clients still believe they are online
        // long enough to probe.
        let mut ipv4_map = HashMap::new();
        ipv4_map.insert("method".to_string(), Value::new("shared"));
        settings.insert("ipv4".to_string(), ipv4_map);

        let mut ipv6_map = HashMap::new();
        ipv6_map.insert("method".to_string(), Value::new("ignore"));
        settings.insert("ipv6".to_string(), ipv6_map);

        let profile = add_and_activate(&connection, settings, &device)
            .await
            .with_context(|| format!("activating access point '{ssid}'"))?;

        wait_activated(&connection, &device, AP_ACTIVATION_TIMEOUT)
            .await
            .with_context(|| format!("waiting for access point '{ssid}'"))?;

        tracing::info!("Access point '{}' up on {}", ssid, self.interface);
        Ok(profile)
    }

    async fn activate_uplink(&self, ssid: &str, psk: Option<&str>) -> Result<ActiveProfile> {
        let connection = system_bus().await?;
        let device = device_path(&connection, &self.interface).await?;

        let mut settings: HashMap<String, HashMap<String, Value>> = HashMap::new();

        let mut conn_map = HashMap::new();
        conn_map.insert("type".to_string(), Value::new("802-11-wireless"));
        conn_map.insert("id".to_string(), Value::new(UPLINK_PROFILE_ID));
        conn_map.insert(
            "uuid".to_string(),
            Value::new(uuid::Uuid::new_v4().to_string()),
        );
        conn_map.insert("autoconnect".to_string(), Value::new(false));
        settings.insert("connection".to_string(), conn_map);

        let mut wireless_map = HashMap::new();
        wireless_map.insert("ssid".to_string(), Value::new(ssid.as_bytes()));
        wireless_map.insert("mode".to_string(), Value::new("infrastructure"));
        settings.insert("802-11-wireless".to_string(), wireless_map);

        if let Some(pass) = psk {
            if !pass.is_empty() {
                let mut security_map = HashMap::new();
                security_map.insert("key-mgmt".to_string(), Value::new("wpa-psk"));
                security_map.insert("psk".to_string(), Value::new(pass));
                settings.insert("802-11-wireless-security".to_string(), security_map);
            }
        }

        let mut ipv4_map = HashMap::new();
        ipv4_map.insert("method".to_string(), Value::new("auto"));
        settings.insert("ipv4".to_string(), ipv4_map);

        let mut ipv6_map = HashMap::new();
        ipv6_map.insert("method".to_string(), Value::new("auto"));
        settings.insert("ipv6".to_string(), ipv6_map);

        let profile = add_and_activate(&connection, settings, &device)
            .await
            .with_context(|| format!("requesting join of '{ssid}'"))?;

        tracing::info!("Join of '{}' requested on {}", ssid, self.interface);
        Ok(profile)
    }

    async fn teardown_profile(&self, profile: ActiveProfile) -> Result<()> {
        let connection = system_bus().await?;
        deactivate_and_delete(&connection, &profile).await;
        Ok(())
    }

    async fn connected(&self) -> Result<bool> {
        let connection = system_bus().await?;
        let device = device_path(&connection, &self.interface).await?;
        let state = device_state(&connection, &device).await?;
        Ok(state == NmDeviceState::Activated)
    }

    async fn scan_networks(&self) -> Result<Vec<SurveyedNetwork>> {
        let connection = system_bus().await?;
        let device = device_path(&connection, &self.interface).await?;

        let wireless = zbus::Proxy::new(&connection, NM_SERVICE, device.clone(), WIRELESS_IFACE)
            .await
            .context("creating wireless device proxy")?;

        let mut scan_options: HashMap<String, Value> = HashMap::new();
        scan_options.insert("ssids".to_string(), Value::new(Vec::<Vec<u8>>::new()));

        // A scan request can be refused while one is in flight; stale
        // results from GetAccessPoints are still worth listing.
        if let Err(err) = wireless.call_method("RequestScan", &(scan_options,)).await {
            tracing::debug!("RequestScan refused: {err}");
        }
        tokio::time::sleep(SCAN_SETTLE).await;

        let ap_paths: Vec<OwnedObjectPath> = wireless
            .call_method("GetAccessPoints", &())
            .await
            .context("listing access points")?
            .body()
            .deserialize()
            .context("parsing access point list")?;

        let mut networks = Vec::new();
        for ap_path in ap_paths {
            let ap = zbus::Proxy::new(&connection, NM_SERVICE, ap_path, ACCESS_POINT_IFACE).await?;

            let ssid_bytes: Vec<u8> = ap.get_property("Ssid").await.unwrap_or_default();
            let ssid = String::from_utf8_lossy(&ssid_bytes).to_string();
            if ssid.is_empty() {
                continue;
            }

            let bssid: String = ap.get_property("HwAddress").await.unwrap_or_default();
            let strength: u8 = ap.get_property("Strength").await.unwrap_or(0);
            let frequency: u32 = ap.get_property("Frequency").await.unwrap_or(0);
            let flags: u32 = ap.get_property("Flags").await.unwrap_or(0);
            let wpa_flags: u32 = ap.get_property("WpaFlags").await.unwrap_or(0);
            let rsn_flags: u32 = ap.get_property("RsnFlags").await.unwrap_or(0);

            networks.push(SurveyedNetwork {
                ssid,
                bssid,
                signal_dbm: strength_to_dbm(strength),
                channel: frequency_to_channel(frequency),
                cipher: classify_security(flags, wpa_flags, rsn_flags),
            });
        }

        Ok(networks)
    }

    fn take_profile(slot: &Mutex<Option<ActiveProfile>>) -> Option<ActiveProfile> {
        slot.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    fn store_profile(slot: &Mutex<Option<ActiveProfile>>, profile: ActiveProfile) {
        *slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(profile);
    }
}

impl RadioControl for NetworkManagerRadio {
    fn start_access_point(&self, ssid: &str, passphrase: Option<&str>) -> Result<()> {
        if let Some(previous) = Self::take_profile(&self.access_point) {
            self.runtime.block_on(self.teardown_profile(previous))?;
        }
        let profile = self
            .runtime
            .block_on(self.activate_access_point(ssid, passphrase))?;
        Self::store_profile(&self.access_point, profile);
        Ok(())
    }

    fn stop_access_point(&self) -> Result<()> {
        if let Some(profile) = Self::take_profile(&self.access_point) {
            self.runtime.block_on(self.teardown_profile(profile))?;
            tracing::info!("Access point stopped on {}", self.interface);
        }
        Ok(())
    }

    fn ensure_station_mode(&self) -> Result<()> {
        self.stop_access_point()
    }

    fn request_join(&self, ssid: &str, psk: Option<&str>) -> Result<()> {
        if let Some(previous) = Self::take_profile(&self.uplink) {
            self.runtime.block_on(self.teardown_profile(previous))?;
        }
        let profile = self.runtime.block_on(self.activate_uplink(ssid, psk))?;
        Self::store_profile(&self.uplink, profile);
        Ok(())
    }

    fn is_connected(&self) -> Result<bool> {
        self.runtime.block_on(self.connected())
    }

    fn survey(&self) -> Result<Vec<SurveyedNetwork>> {
        self.runtime.block_on(self.scan_networks())
    }
}

async fn system_bus() -> Result<Connection> {
    Connection::system()
        .await
        .context("connecting to the system bus")
}

async fn nm_proxy(connection: &Connection) -> Result<zbus::Proxy<'_>> {
    zbus::Proxy::new(connection, NM_SERVICE, NM_PATH, NM_IFACE)
        .await
        .context("creating NetworkManager proxy")
}

async fn device_path(connection: &Connection, interface: &str) -> Result<OwnedObjectPath> {
    let proxy = nm_proxy(connection).await?;
    proxy
        .call_method("GetDeviceByIpIface", &(interface))
        .await
        .with_context(|| format!("looking up device for interface '{interface}'"))?
        .body()
        .deserialize()
        .context("parsing device path")
}

async fn device_state(connection: &Connection, device: &OwnedObjectPath) -> Result<NmDeviceState> {
    let proxy = zbus::Proxy::new(connection, NM_SERVICE, device.clone(), DEVICE_IFACE)
        .await
        .context("creating device proxy")?;
    let state: u32 = proxy
        .get_property("State")
        .await
        .context("reading device state")?;
    Ok(NmDeviceState::from_u32(state))
}

async fn add_and_activate(
    connection: &Connection,
    settings: HashMap<String, HashMap<String, Value<'_>>>,
    device: &OwnedObjectPath,
) -> Result<ActiveProfile> {
    let proxy = nm_proxy(connection).await?;
    let (settings_path, active_path): (OwnedObjectPath, OwnedObjectPath) = proxy
        .call_method(
            "AddAndActivateConnection",
            &(
                settings,
                device.as_ref(),
                ObjectPath::from_str_unchecked("/"),
            ),
        )
        .await
        .context("AddAndActivateConnection failed")?
        .body()
        .deserialize()
        .context("parsing AddAndActivateConnection response")?;

    Ok(ActiveProfile {
        settings: settings_path,
        active: active_path,
    })
}

/// Best effort: the active connection may already be gone and the
/// profile may already be deleted, neither of which matters.
async fn deactivate_and_delete(connection: &Connection, profile: &ActiveProfile) {
    match nm_proxy(connection).await {
        Ok(proxy) => {
            if let Err(err) = proxy
                .call_method("DeactivateConnection", &(profile.active.as_ref()))
                .await
            {
                tracing::debug!("DeactivateConnection: {err}");
            }
        }
        Err(err) => tracing::debug!("skipping deactivate: {err}"),
    }

    match zbus::Proxy::new(
        connection,
        NM_SERVICE,
        profile.settings.clone(),
        SETTINGS_CONNECTION_IFACE,
    )
    .await
    {
        Ok(proxy) => {
            if let Err(err) = proxy.call_method("Delete", &()).await {
                tracing::debug!("deleting connection profile: {err}");
            }
        }
        Err(err) => tracing::debug!("skipping profile delete: {err}"),
    }
}

async fn wait_activated(
    connection: &Connection,
    device: &OwnedObjectPath,
    timeout: Duration,
) -> Result<()> {
    let start = tokio::time::Instant::now();
    loop {
        let state = device_state(connection, device).await?;
        match state {
            NmDeviceState::Activated => return Ok(()),
            NmDeviceState::Failed => bail!("activation failed"),
            NmDeviceState::NeedAuth => bail!("activation stuck on authentication"),
            _ => {
                if start.elapsed() > timeout {
                    bail!("activation timed out in state {}", state.as_str());
                }
                tracing::debug!("waiting for activation (state {})", state.as_str());
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

fn classify_security(flags: u32, wpa_flags: u32, rsn_flags: u32) -> CipherSuite {
    if rsn_flags & SEC_KEY_MGMT_SAE != 0 {
        CipherSuite::Wpa3
    } else if rsn_flags & SEC_KEY_MGMT_802_1X != 0 {
        CipherSuite::Wpa2Enterprise
    } else if rsn_flags != 0 && wpa_flags != 0 {
        CipherSuite::WpaWpa2Mixed
    } else if rsn_flags != 0 {
        CipherSuite::Wpa2
    } else if wpa_flags != 0 {
        CipherSuite::Wpa
    } else if flags & AP_FLAGS_PRIVACY != 0 {
        CipherSuite::Wep
    } else {
        CipherSuite::Open
    }
}

fn frequency_to_channel(mhz: u32) -> u32 {
    match mhz {
        2412..=2472 => (mhz - 2407) / 5,
        2484 => 14,
        5160..=5885 => (mhz - 5000) / 5,
        5955..=7115 => (mhz - 5950) / 5,
        _ => 0,
    }
}

/// Approximate inverse of the percent scale NetworkManager reports;
/// the portal only needs a coarse dBm figure for the survey.
fn strength_to_dbm(strength: u8) -> i32 {
    i32::from(strength.min(100)) / 2 - 90
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_classification_prefers_strongest_suite() {
        assert_eq!(classify_security(0, 0, 0), CipherSuite::Open);
        assert_eq!(classify_security(0x1, 0, 0), CipherSuite::Wep);
        assert_eq!(classify_security(0x1, 0x100, 0), CipherSuite::Wpa);
        assert_eq!(classify_security(0x1, 0, 0x100), CipherSuite::Wpa2);
        assert_eq!(classify_security(0x1, 0x100, 0x100), CipherSuite::WpaWpa2Mixed);
        assert_eq!(
            classify_security(0x1, 0, SEC_KEY_MGMT_802_1X),
            CipherSuite::Wpa2Enterprise
        );
        assert_eq!(
            classify_security(0x1, 0, SEC_KEY_MGMT_SAE),
            CipherSuite::Wpa3
        );
    }

    #[test]
    fn frequencies_map_to_channels() {
        assert_eq!(frequency_to_channel(2412), 1);
        assert_eq!(frequency_to_channel(2437), 6);
        assert_eq!(frequency_to_channel(2472), 13);
        assert_eq!(frequency_to_channel(2484), 14);
        assert_eq!(frequency_to_channel(5180), 36);
        assert_eq!(frequency_to_channel(5745), 149);
        assert_eq!(frequency_to_channel(0), 0);
    }

    #[test]
    fn strength_converts_to_coarse_dbm() {
        assert_eq!(strength_to_dbm(0), -90);
        assert_eq!(strength_to_dbm(50), -65);
        assert_eq!(strength_to_dbm(100), -40);
        assert_eq!(strength_to_dbm(255), -40);
    }
}
