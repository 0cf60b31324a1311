//! Message identifiers
//!
//! The remote service hands out two kinds of ids. A [`StableId`] is assigned
//! once per logical message and never changes; it is the archive's primary
//! key. A [`TransientId`] is only meaningful inside the folder currently
//! selected on one connection and is what bulk protocol commands take.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Permanent, server-assigned identifier for a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(pub u64);

impl StableId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for StableId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Folder- and session-scoped identifier used for bulk operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransientId(pub u32);

impl TransientId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for TransientId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        assert_eq!(serde_json::to_string(&StableId::new(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&TransientId::new(7)).unwrap(), "7");

        let id: StableId = serde_json::from_str("1234567890123").unwrap();
        assert_eq!(id, StableId(1_234_567_890_123));
    }

    #[test]
    fn test_display() {
        assert_eq!(StableId::new(99).to_string(), "99");
        assert_eq!(TransientId::new(3).to_string(), "3");
    }
}
