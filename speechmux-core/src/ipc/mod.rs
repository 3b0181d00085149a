//! Types crossing the engine boundary.
//!
//! Event types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! mirror them over its own transport.

pub mod channel;
pub mod events;
