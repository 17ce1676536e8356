mod networkmanager;

pub use networkmanager::{NetworkManagerRadio, NmDeviceState};

use anyhow::Result;

use crate::survey::SurveyedNetwork;

/// Everything the controller needs from the wireless hardware. One
/// interface plays both roles, so implementations own the mode flip:
/// starting the access point implies leaving station use and vice
/// versa.
pub trait RadioControl: Send + Sync {
    /// Put the interface into access-point role advertising `ssid`.
    /// Returns once the access point is up and addressable.
    fn start_access_point(&self, ssid: &str, passphrase: Option<&str>) -> Result<()>;

    /// Tear the access point down. A no-op when none is running.
    fn stop_access_point(&self) -> Result<()>;

    /// Return the interface to ordinary client (station) duty.
    fn ensure_station_mode(&self) -> Result<()>;

    /// Begin joining the named network. Does not wait for the join to
    /// complete; callers poll [`RadioControl::is_connected`].
    fn request_join(&self, ssid: &str, psk: Option<&str>) -> Result<()>;

    /// Whether the interface currently holds an activated connection.
    fn is_connected(&self) -> Result<bool>;

    /// Scan and list nearby networks.
    fn survey(&self) -> Result<Vec<SurveyedNetwork>>;
}
