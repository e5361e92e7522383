//! Types the client publishes to its host.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them to a UI layer unchanged.

pub mod events;
