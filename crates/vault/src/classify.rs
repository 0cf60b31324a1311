//! Protocol failure classification and recovery
//!
//! Every failure raised by a [`MailClient`] during a pass goes through
//! [`ErrorClassifier`]. Known categories are recovered locally and recorded
//! in the caller's [`ErrorReport`]; anything else aborts the pass.

use std::thread;
use std::time::Duration;

use log::{error, warn};

use crate::archive::ArchiveStore;
use crate::client::{FetchRequest, MailClient, ProtocolError, ProtocolErrorKind};
use crate::error::{Result, VaultError};
use crate::models::{ErrorReport, StableId, TransientId};

/// Fixed taxonomy of protocol failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The connection died under the command
    TransientProtocolAbort,
    /// The server cannot fetch or parse this item
    ServerRejectedItem,
    /// The server refused an appended message
    PushRejected,
    /// No known signature; aborts the operation
    Unclassified,
}

impl ErrorCategory {
    pub fn of(err: &ProtocolError) -> Self {
        match err.kind {
            ProtocolErrorKind::Abort => ErrorCategory::TransientProtocolAbort,
            ProtocolErrorKind::Unfetchable | ProtocolErrorKind::Unparseable => {
                ErrorCategory::ServerRejectedItem
            }
            ProtocolErrorKind::AppendRejected => ErrorCategory::PushRejected,
            ProtocolErrorKind::Other => ErrorCategory::Unclassified,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorCategory::Unclassified)
    }
}

/// Drives recovery for classified failures
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    backoff: Duration,
}

impl ErrorClassifier {
    /// `backoff` is the fixed wait before reconnecting after an abort
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    pub fn category(&self, err: &ProtocolError) -> ErrorCategory {
        ErrorCategory::of(err)
    }

    /// Recover from a failure while fetching one transient id
    ///
    /// The id always ends up in `report.unfetchable`, with its stable id when
    /// it could be recovered.
    ///
    /// # Errors
    /// The original failure when it is unclassified, or the reconnection
    /// failure after an abort.
    pub fn handle_fetch_error(
        &self,
        err: ProtocolError,
        id: TransientId,
        client: &mut dyn MailClient,
        archive: &dyn ArchiveStore,
        report: &mut ErrorReport,
    ) -> Result<()> {
        match self.category(&err) {
            ErrorCategory::TransientProtocolAbort => {
                warn!("Connection aborted while fetching {}: {}", id, err.message);
                let stable_id = recover_stable_id(client, id);
                if stable_id.is_none() {
                    self.reconnect(client)?;
                }
                report.record_unfetchable(id, stable_id);
                Ok(())
            }
            ErrorCategory::ServerRejectedItem | ErrorCategory::PushRejected => {
                let stable_id = recover_stable_id(client, id);
                warn!(
                    "Cannot fetch {} (stable id {}): {}. Skipping it",
                    id,
                    stable_id.map_or_else(|| "unknown".to_string(), |s| s.to_string()),
                    err.message
                );
                report.record_unfetchable(id, stable_id);
                if let Some(stable_id) = stable_id {
                    quarantine(archive, stable_id, report)?;
                }
                Ok(())
            }
            ErrorCategory::Unclassified => {
                error!("Unexpected error while fetching {}: {}", id, err);
                Err(VaultError::Protocol(err))
            }
        }
    }

    /// Recover from a failure while restoring one archived message
    ///
    /// Recoverable failures quarantine the record. An abort also reconnects.
    pub fn handle_restore_error(
        &self,
        err: ProtocolError,
        id: StableId,
        client: &mut dyn MailClient,
        archive: &dyn ArchiveStore,
        report: &mut ErrorReport,
    ) -> Result<()> {
        match self.category(&err) {
            ErrorCategory::TransientProtocolAbort => {
                warn!("Connection aborted while restoring {}: {}", id, err.message);
                quarantine(archive, id, report)?;
                self.reconnect(client)
            }
            ErrorCategory::ServerRejectedItem | ErrorCategory::PushRejected => {
                warn!("Server rejected {}: {}. Quarantining it", id, err.message);
                quarantine(archive, id, report)
            }
            ErrorCategory::Unclassified => {
                error!("Unexpected error while restoring {}: {}", id, err);
                Err(VaultError::Protocol(err))
            }
        }
    }

    /// Disconnect, wait the fixed backoff and reconnect
    pub fn reconnect(&self, client: &mut dyn MailClient) -> Result<()> {
        client.disconnect();
        if !self.backoff.is_zero() {
            warn!("Reconnecting in {}s", self.backoff.as_secs());
            thread::sleep(self.backoff);
        }
        client.reconnect().map_err(|err| {
            error!("Reconnection failed: {}", err);
            VaultError::Protocol(err)
        })
    }
}

/// Best-effort lookup of the stable id behind a transient id
fn recover_stable_id(client: &mut dyn MailClient, id: TransientId) -> Option<StableId> {
    match client.fetch_one(id, FetchRequest::StableIdOnly) {
        Ok(fields) => fields.map(|f| f.stable_id),
        Err(err) => {
            warn!("Cannot recover the stable id of {}: {}", id, err.message);
            None
        }
    }
}

fn quarantine(archive: &dyn ArchiveStore, id: StableId, report: &mut ErrorReport) -> Result<()> {
    if archive.quarantine(id)? {
        report.record_quarantined(id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::InMemoryArchiveStore;
    use crate::client::{Folder, InMemoryMailClient};
    use crate::models::{MessageKind, MessageMetadata};
    use chrono::Utc;

    fn setup() -> (InMemoryMailClient, TransientId, InMemoryArchiveStore) {
        let mut client = InMemoryMailClient::new();
        let meta = MessageMetadata::new(StableId::new(77), Utc::now());
        let id = client.add_email(meta.clone(), "body");
        client.select_folder(&Folder::AllMail).unwrap();

        let archive = InMemoryArchiveStore::new();
        archive.bury(&meta, MessageKind::Email, b"body", false).unwrap();
        (client, id, archive)
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            ErrorCategory::of(&ProtocolError::abort("x")),
            ErrorCategory::TransientProtocolAbort
        );
        assert_eq!(
            ErrorCategory::of(&ProtocolError::unparseable("x")),
            ErrorCategory::ServerRejectedItem
        );
        assert_eq!(
            ErrorCategory::of(&ProtocolError::append_rejected("x")),
            ErrorCategory::PushRejected
        );
        assert!(!ErrorCategory::of(&ProtocolError::other("x")).is_recoverable());
    }

    #[test]
    fn test_rejected_fetch_quarantines_known_record() {
        let (mut client, id, archive) = setup();
        let classifier = ErrorClassifier::new(Duration::ZERO);
        let mut report = ErrorReport::new();

        classifier
            .handle_fetch_error(
                ProtocolError::unfetchable("bad"),
                id,
                &mut client,
                &archive,
                &mut report,
            )
            .unwrap();

        assert_eq!(report.unfetchable[0].stable_id, Some(StableId::new(77)));
        assert_eq!(report.quarantined, vec![StableId::new(77)]);
        assert!(archive.get_record(StableId::new(77)).unwrap().unwrap().quarantined);
    }

    #[test]
    fn test_abort_on_dead_connection_reconnects() {
        let (mut client, id, archive) = setup();
        client.disconnect();
        let classifier = ErrorClassifier::new(Duration::ZERO);
        let mut report = ErrorReport::new();

        classifier
            .handle_fetch_error(ProtocolError::abort("eof"), id, &mut client, &archive, &mut report)
            .unwrap();

        assert_eq!(client.reconnection_count(), 1);
        assert_eq!(report.unfetchable[0].stable_id, None);
        assert!(report.quarantined.is_empty());
    }

    #[test]
    fn test_failed_reconnect_propagates() {
        let (mut client, id, archive) = setup();
        client.disconnect();
        client.fail_reconnects(1);
        let classifier = ErrorClassifier::new(Duration::ZERO);
        let mut report = ErrorReport::new();

        let result = classifier.handle_fetch_error(
            ProtocolError::abort("eof"),
            id,
            &mut client,
            &archive,
            &mut report,
        );
        assert!(matches!(result, Err(VaultError::Protocol(_))));
    }

    #[test]
    fn test_unclassified_is_raised() {
        let (mut client, id, archive) = setup();
        let classifier = ErrorClassifier::new(Duration::ZERO);
        let mut report = ErrorReport::new();

        let result = classifier.handle_fetch_error(
            ProtocolError::other("boom"),
            id,
            &mut client,
            &archive,
            &mut report,
        );
        assert!(result.is_err());
        assert!(report.is_clean());
    }

    #[test]
    fn test_push_rejection_quarantines() {
        let (mut client, _, archive) = setup();
        let classifier = ErrorClassifier::new(Duration::ZERO);
        let mut report = ErrorReport::new();

        classifier
            .handle_restore_error(
                ProtocolError::append_rejected("too big"),
                StableId::new(77),
                &mut client,
                &archive,
                &mut report,
            )
            .unwrap();

        assert_eq!(report.quarantined, vec![StableId::new(77)]);
        assert_eq!(client.reconnection_count(), 0);
    }

    #[test]
    fn test_restore_abort_quarantines_and_reconnects() {
        let (mut client, _, archive) = setup();
        let classifier = ErrorClassifier::new(Duration::ZERO);
        let mut report = ErrorReport::new();

        classifier
            .handle_restore_error(
                ProtocolError::abort("eof"),
                StableId::new(77),
                &mut client,
                &archive,
                &mut report,
            )
            .unwrap();

        assert_eq!(report.quarantined, vec![StableId::new(77)]);
        assert_eq!(client.reconnection_count(), 1);
    }
}
