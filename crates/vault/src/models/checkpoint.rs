//! Checkpoint tracking for resumable passes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{MessageKind, StableId};
use crate::error::VaultError;

/// The four resumable operations
///
/// Each one keeps its own checkpoint per login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    EmailSync,
    EmailRestore,
    ChatSync,
    ChatRestore,
}

impl OperationType {
    /// Sync operation for a message kind
    pub fn sync(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Email => OperationType::EmailSync,
            MessageKind::Chat => OperationType::ChatSync,
        }
    }

    /// Restore operation for a message kind
    pub fn restore(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Email => OperationType::EmailRestore,
            MessageKind::Chat => OperationType::ChatRestore,
        }
    }

    /// Suffix of the checkpoint file name (`<login>_<suffix>`)
    pub fn file_suffix(&self) -> &'static str {
        match self {
            OperationType::EmailSync => "email_last_id.sync",
            OperationType::EmailRestore => "email_last_id.restore",
            OperationType::ChatSync => "chat_last_id.sync",
            OperationType::ChatRestore => "chat_last_id.restore",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::EmailSync => "email-sync",
            OperationType::EmailRestore => "email-restore",
            OperationType::ChatSync => "chat-sync",
            OperationType::ChatRestore => "chat-restore",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email-sync" => Ok(OperationType::EmailSync),
            "email-restore" => Ok(OperationType::EmailRestore),
            "chat-sync" => Ok(OperationType::ChatSync),
            "chat-restore" => Ok(OperationType::ChatRestore),
            other => Err(VaultError::UnknownOperation(other.to_string())),
        }
    }
}

/// Persisted content of a checkpoint file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Most recently completed stable id
    pub last_id: StableId,
}

impl Checkpoint {
    pub fn new(last_id: StableId) -> Self {
        Self { last_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_roundtrip() {
        for op in [
            OperationType::EmailSync,
            OperationType::EmailRestore,
            OperationType::ChatSync,
            OperationType::ChatRestore,
        ] {
            assert_eq!(op.as_str().parse::<OperationType>().unwrap(), op);
        }
    }

    #[test]
    fn test_unknown_operation_fails_loudly() {
        let err = "calendar-sync".parse::<OperationType>().unwrap_err();
        assert!(matches!(err, VaultError::UnknownOperation(name) if name == "calendar-sync"));
    }

    #[test]
    fn test_file_suffixes_are_distinct() {
        assert_eq!(OperationType::sync(MessageKind::Email).file_suffix(), "email_last_id.sync");
        assert_eq!(OperationType::restore(MessageKind::Chat).file_suffix(), "chat_last_id.restore");
        assert_ne!(
            OperationType::EmailRestore.file_suffix(),
            OperationType::ChatRestore.file_suffix()
        );
    }

    #[test]
    fn test_checkpoint_format() {
        let json = serde_json::to_string(&Checkpoint::new(StableId::new(1500))).unwrap();
        assert_eq!(json, r#"{"last_id":1500}"#);
    }
}
