#![deny(unsafe_op_in_unsafe_fn)]

//! Captive-portal HTTP surface.
//!
//! Every request that reaches the portal interface ends at the login
//! form one way or another: known OS connectivity probes get a redirect
//! with an HTML fallback, requests addressed to foreign hosts get a
//! cache-disabled redirect, and everything else is served the form.
//! Accepted submissions are stored and always answered with the
//! "invalid credentials" page; the portal never grants access.

mod config;
mod logging;
mod pages;
mod server;
mod service;

pub use config::PortalConfig;
pub use logging::CaptureLog;
pub use server::{build_router, run_server, PortalContext, TriggerHook, PROBE_PATHS};
pub use service::PortalServer;
