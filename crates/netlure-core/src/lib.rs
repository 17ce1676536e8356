#![deny(unsafe_op_in_unsafe_fn)]

//! Orchestration for the appliance: mode switching between wireless
//! survey and captive-portal capture, the credential delivery pass over
//! an upstream uplink, and the operator console. The portal and DNS
//! services themselves live in their own crates; this one decides when
//! they run.

pub mod config;
pub mod console;
pub mod controller;
pub mod logging;
pub mod radio;
pub mod survey;
pub mod sync;

pub use config::Config;
pub use controller::{ConsoleCommand, ControlEvent, ModeController, OperationMode};
pub use radio::{NetworkManagerRadio, RadioControl};
pub use survey::{CipherSuite, SecuritySummary, SurveyedNetwork};
pub use sync::{JoinOutcome, SyncAgent, SyncConfig, SyncReport};
