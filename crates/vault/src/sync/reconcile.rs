//! Removal of archived messages deleted on the server

use log::{debug, info, warn};
use std::collections::BTreeSet;

use super::engine::folder_for;
use crate::archive::ArchiveStore;
use crate::client::{FetchRequest, MailClient, SearchQuery};
use crate::error::Result;
use crate::models::{MessageKind, StableId};

/// Deletes archive entries that no longer exist remotely
///
/// Only ever runs on an archive with exactly one owner: with several owners
/// a message missing from one account may still belong to another.
pub struct DeletionReconciler<'a> {
    client: &'a mut dyn MailClient,
    archive: &'a dyn ArchiveStore,
    group_size: usize,
}

impl<'a> DeletionReconciler<'a> {
    /// `group_size` is the number of ids resolved per query
    pub fn new(
        client: &'a mut dyn MailClient,
        archive: &'a dyn ArchiveStore,
        group_size: usize,
    ) -> Self {
        Self {
            client,
            archive,
            group_size: group_size.max(1),
        }
    }

    /// Reconcile emails, then chats when their folder is visible
    pub fn run_all(&mut self) -> Result<Vec<StableId>> {
        let mut deleted = self.run(MessageKind::Email)?;
        deleted.extend(self.run(MessageKind::Chat)?);
        Ok(deleted)
    }

    /// Reconcile one kind, returning the deleted ids
    pub fn run(&mut self, kind: MessageKind) -> Result<Vec<StableId>> {
        let owners = self.archive.owners()?;
        if owners.len() != 1 {
            warn!(
                "Archive {} has {} owners. Not deleting any {}",
                self.archive.location(),
                owners.len(),
                kind
            );
            return Ok(Vec::new());
        }

        let mut local: BTreeSet<StableId> =
            self.archive.list_ids(kind, None)?.into_iter().collect();
        if local.is_empty() {
            return Ok(Vec::new());
        }

        let folder = folder_for(kind);
        if !self.client.is_visible(&folder)? {
            info!("{} folder is not visible. Keeping archived {}s", folder, kind);
            return Ok(Vec::new());
        }
        self.client.select_folder(&folder)?;

        let remote = self.client.search(&SearchQuery::All)?;
        info!(
            "Checking {} archived {}s against {} remote ids",
            local.len(),
            kind,
            remote.len()
        );

        for group in remote.chunks(self.group_size) {
            if local.is_empty() {
                debug!("Every archived {} is still present remotely", kind);
                break;
            }
            let resolved = self.client.fetch(group, FetchRequest::StableIdOnly)?;
            if resolved.len() < group.len() {
                debug!(
                    "{} of {} remote ids returned no stable id",
                    group.len() - resolved.len(),
                    group.len()
                );
            }
            for fields in resolved.values() {
                local.remove(&fields.stable_id);
            }
        }

        if local.is_empty() {
            return Ok(Vec::new());
        }

        let doomed: Vec<StableId> = local.into_iter().collect();
        let removed = self.archive.delete(&doomed)?;
        info!("Deleted {} {}s no longer present remotely", removed, kind);
        Ok(doomed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::InMemoryArchiveStore;
    use crate::client::{Call, InMemoryMailClient};
    use crate::models::MessageMetadata;
    use chrono::Utc;

    fn setup(count: u64) -> (InMemoryMailClient, InMemoryArchiveStore) {
        let client = InMemoryMailClient::new();
        let archive = InMemoryArchiveStore::new();
        for id in 1..=count {
            let meta = MessageMetadata::new(StableId::new(id), Utc::now());
            client.add_email(meta.clone(), "body");
            archive.bury(&meta, MessageKind::Email, b"body", false).unwrap();
        }
        (client, archive)
    }

    #[test]
    fn test_single_owner_deletes_vanished_message() {
        let (mut client, archive) = setup(5);
        archive.store_owner("a@x.com").unwrap();
        client.remove(StableId::new(3));

        let deleted = DeletionReconciler::new(&mut client, &archive, 2)
            .run(MessageKind::Email)
            .unwrap();

        assert_eq!(deleted, vec![StableId::new(3)]);
        assert!(!archive.has_record(StableId::new(3)).unwrap());
        assert_eq!(archive.len(), 4);
    }

    #[test]
    fn test_multiple_owners_delete_nothing() {
        let (mut client, archive) = setup(3);
        archive.store_owner("a@x.com").unwrap();
        archive.store_owner("b@x.com").unwrap();
        client.remove(StableId::new(1));
        client.remove(StableId::new(2));

        let deleted = DeletionReconciler::new(&mut client, &archive, 1400)
            .run_all()
            .unwrap();

        assert!(deleted.is_empty());
        assert_eq!(archive.len(), 3);
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_no_owner_deletes_nothing() {
        let (mut client, archive) = setup(2);
        client.remove(StableId::new(1));

        let deleted = DeletionReconciler::new(&mut client, &archive, 1400)
            .run(MessageKind::Email)
            .unwrap();
        assert!(deleted.is_empty());
    }

    #[test]
    fn test_stops_once_local_set_is_empty() {
        let (mut client, archive) = setup(2);
        archive.store_owner("a@x.com").unwrap();
        // remote-only messages after the archived ones
        for id in 100..110 {
            client.add_email(MessageMetadata::new(StableId::new(id), Utc::now()), "x");
        }

        let deleted = DeletionReconciler::new(&mut client, &archive, 2)
            .run(MessageKind::Email)
            .unwrap();

        assert!(deleted.is_empty());
        let fetches = client
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::Fetch { .. }))
            .count();
        assert_eq!(fetches, 1);
    }

    #[test]
    fn test_silent_remote_id_does_not_block_deletion() {
        let (mut client, archive) = setup(4);
        archive.store_owner("a@x.com").unwrap();
        client.remove(StableId::new(3));
        let remote_only =
            client.add_email(MessageMetadata::new(StableId::new(77), Utc::now()), "x");
        client.return_empty(remote_only);

        let deleted = DeletionReconciler::new(&mut client, &archive, 1400)
            .run(MessageKind::Email)
            .unwrap();

        assert_eq!(deleted, vec![StableId::new(3)]);
        assert!(!archive.has_record(StableId::new(3)).unwrap());
        assert_eq!(archive.len(), 3);
    }

    #[test]
    fn test_hidden_chats_are_kept() {
        let mut client = InMemoryMailClient::new();
        let archive = InMemoryArchiveStore::new();
        archive.store_owner("a@x.com").unwrap();
        let meta = MessageMetadata::new(StableId::new(50), Utc::now());
        archive.bury(&meta, MessageKind::Chat, b"chat", false).unwrap();
        client.set_chats_visible(false);

        let deleted = DeletionReconciler::new(&mut client, &archive, 1400)
            .run_all()
            .unwrap();

        assert!(deleted.is_empty());
        assert!(archive.has_record(StableId::new(50)).unwrap());
    }
}
