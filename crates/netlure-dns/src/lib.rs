//! Wildcard DNS responder for the portal interface.
//!
//! Every parseable query received on UDP/53 is answered with a single A
//! record pointing at the portal address, regardless of the name or type
//! asked for. Client operating systems resolve arbitrary hostnames to
//! decide whether a network is usable; answering all of them with the
//! portal address is what funnels their follow-up HTTP traffic into the
//! login flow. Malformed packets are dropped without a reply.

mod error;
mod service;
mod wire;

pub use error::HijackError;
pub use service::{HijackConfig, HijackStats, NameHijacker, DNS_PORT};
pub use wire::{decode_query, encode_answer, PacketError, QueryView};

pub type Result<T> = std::result::Result<T, HijackError>;
