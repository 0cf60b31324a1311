//! Error types surfaced by vault operations

use thiserror::Error;

use crate::client::ProtocolError;
use crate::models::{ErrorReport, StableId};

/// Result alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Failures that abort an operation
#[derive(Debug, Error)]
pub enum VaultError {
    /// The archive already belongs to other logins
    #[error(
        "The archive {archive} is already associated with one or many logins: {}. Enable multiple owners to link it with {login}",
        .owners.join(", ")
    )]
    OwnershipConflict {
        archive: String,
        owners: Vec<String>,
        login: String,
    },

    /// A refetch reported another stable id for an archived message
    #[error("Stable id has changed from {stored} to {fetched}")]
    StableIdChanged { stored: StableId, fetched: StableId },

    /// An operation name that maps to no checkpoint
    #[error("Unknown operation type: {0}")]
    UnknownOperation(String),

    /// A listed archive entry has no record behind it
    #[error("No archived record for stable id {0}")]
    MissingRecord(StableId),

    /// The background label worker is gone
    #[error("Label worker stopped before all jobs were submitted")]
    LabelWorkerStopped,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Unclassified protocol failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Archive or checkpoint storage failure
    #[error(transparent)]
    Archive(#[from] anyhow::Error),

    /// A pass aborted; carries what was recorded before the abort
    #[error("Operation interrupted: {source}")]
    Interrupted {
        report: Box<ErrorReport>,
        source: Box<VaultError>,
    },
}

impl VaultError {
    /// Wrap an abort together with the partial report
    pub fn interrupted(source: VaultError, report: ErrorReport) -> Self {
        match source {
            // keep a single layer when a nested pass already wrapped it
            VaultError::Interrupted {
                report: inner,
                source,
            } => {
                let mut merged = report;
                merged.merge(*inner);
                VaultError::Interrupted {
                    report: Box::new(merged),
                    source,
                }
            }
            other => VaultError::Interrupted {
                report: Box::new(report),
                source: Box::new(other),
            },
        }
    }

    /// Partial report of an interrupted operation
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            VaultError::Interrupted { report, .. } => Some(report),
            _ => None,
        }
    }

    /// The underlying failure, looking through `Interrupted`
    pub fn root(&self) -> &VaultError {
        match self {
            VaultError::Interrupted { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransientId;

    #[test]
    fn test_ownership_message_lists_owners() {
        let err = VaultError::OwnershipConflict {
            archive: "/tmp/db".to_string(),
            owners: vec!["a@x.com".to_string(), "c@x.com".to_string()],
            login: "b@x.com".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("a@x.com, c@x.com"));
        assert!(text.contains("b@x.com"));
    }

    #[test]
    fn test_interrupted_keeps_single_layer() {
        let mut inner_report = ErrorReport::new();
        inner_report.record_empty(TransientId::new(1));
        let inner = VaultError::interrupted(
            VaultError::Protocol(ProtocolError::other("boom")),
            inner_report,
        );

        let mut outer_report = ErrorReport::new();
        outer_report.record_empty(TransientId::new(2));
        let outer = VaultError::interrupted(inner, outer_report);

        assert_eq!(outer.report().unwrap().empty_responses.len(), 2);
        assert!(matches!(outer.root(), VaultError::Protocol(_)));
    }
}
