//! Session identity, per-kind callback contracts and the session registry.

pub mod kind;
pub mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine-assigned identifier of an open session. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct SessionId(u32);

impl SessionId {
    /// Interpret a raw engine id. Zero and negative values mean the engine
    /// refused the request.
    pub fn from_raw(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().filter(|id| *id > 0).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// The id in the engine's integer representation.
    pub fn as_raw(self) -> i32 {
        // Constructed only from positive i32 values.
        self.0 as i32
    }
}

impl TryFrom<i32> for SessionId {
    type Error = String;

    fn try_from(raw: i32) -> std::result::Result<Self, Self::Error> {
        Self::from_raw(raw).ok_or_else(|| format!("session id must be positive, got {raw}"))
    }
}

impl From<SessionId> for i32 {
    fn from(id: SessionId) -> Self {
        id.as_raw()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
