//! Batched metadata fetching with per-id fallback

use log::{debug, warn};

use crate::archive::ArchiveStore;
use crate::classify::ErrorClassifier;
use crate::client::{FetchRequest, FetchResponse, FetchedFields, MailClient, ProtocolErrorKind};
use crate::error::Result;
use crate::models::{ErrorReport, TransientId};

/// One slice of the id sequence and what the server returned for it
#[derive(Debug, Default)]
pub struct FetchBatch {
    /// Ids consumed by this batch, in enumeration order
    pub ids: Vec<TransientId>,
    /// Fields returned, by id
    pub items: FetchResponse,
    /// Ids that failed even on their own; already in the report
    pub failed: Vec<TransientId>,
}

impl FetchBatch {
    /// Returned items in enumeration order
    pub fn in_order(&self) -> impl Iterator<Item = (TransientId, &FetchedFields)> {
        self.ids
            .iter()
            .filter_map(|id| self.items.get(id).map(|fields| (*id, fields)))
    }

    /// Ids the server answered for without any data
    pub fn empty(&self) -> impl Iterator<Item = TransientId> + '_ {
        self.ids
            .iter()
            .copied()
            .filter(|id| !self.items.contains_key(id) && !self.failed.contains(id))
    }
}

/// Cursor over an ordered id sequence, one bulk fetch per step
///
/// Every id is consumed exactly once whatever the outcome. A failed bulk fetch
/// is retried id by id once; nothing else is retried.
pub struct BatchFetcher {
    ids: Vec<TransientId>,
    position: usize,
    batch_size: usize,
    request: FetchRequest,
}

impl BatchFetcher {
    pub fn new(ids: Vec<TransientId>, request: FetchRequest, batch_size: usize) -> Self {
        Self {
            ids,
            position: 0,
            batch_size: batch_size.max(1),
            request,
        }
    }

    pub fn total(&self) -> usize {
        self.ids.len()
    }

    /// Ids not consumed yet
    pub fn remaining(&self) -> usize {
        self.ids.len() - self.position
    }

    /// Restart from the first id
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Fetch the next batch, or None once every id is consumed
    ///
    /// # Errors
    /// Unclassified failures of the per-id fallback, or a failed reconnection.
    pub fn next_batch(
        &mut self,
        client: &mut dyn MailClient,
        classifier: &ErrorClassifier,
        archive: &dyn ArchiveStore,
        report: &mut ErrorReport,
    ) -> Result<Option<FetchBatch>> {
        if self.position >= self.ids.len() {
            return Ok(None);
        }

        let end = (self.position + self.batch_size).min(self.ids.len());
        let ids = self.ids[self.position..end].to_vec();
        self.position = end;

        let mut batch = FetchBatch {
            ids,
            ..Default::default()
        };

        match client.fetch(&batch.ids, self.request) {
            Ok(items) => batch.items = items,
            Err(err) => {
                warn!(
                    "Bulk fetch of {} ids failed ({}). Fetching them one by one",
                    batch.ids.len(),
                    err
                );
                if err.kind == ProtocolErrorKind::Abort {
                    classifier.reconnect(client)?;
                }
                for id in &batch.ids {
                    match client.fetch_one(*id, self.request) {
                        Ok(Some(fields)) => {
                            batch.items.insert(*id, fields);
                        }
                        Ok(None) => debug!("No data returned for {}", id),
                        Err(err) => {
                            classifier.handle_fetch_error(err, *id, client, archive, report)?;
                            batch.failed.push(*id);
                        }
                    }
                }
            }
        }

        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::InMemoryArchiveStore;
    use crate::client::{Folder, InMemoryMailClient};
    use crate::models::{MessageMetadata, StableId};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn mailbox(count: u64) -> (InMemoryMailClient, Vec<TransientId>) {
        let mut client = InMemoryMailClient::new();
        let ids = (1..=count)
            .map(|n| client.add_email(MessageMetadata::new(StableId::new(n * 10), Utc::now()), "x"))
            .collect();
        client.select_folder(&Folder::AllMail).unwrap();
        (client, ids)
    }

    fn drain(
        fetcher: &mut BatchFetcher,
        client: &mut InMemoryMailClient,
        report: &mut ErrorReport,
    ) -> Vec<FetchBatch> {
        let archive = InMemoryArchiveStore::new();
        let classifier = ErrorClassifier::new(Duration::ZERO);
        let mut batches = Vec::new();
        while let Some(batch) = fetcher.next_batch(client, &classifier, &archive, report).unwrap() {
            batches.push(batch);
        }
        batches
    }

    #[test]
    fn test_bulk_failure_falls_back_per_id() {
        let (mut client, ids) = mailbox(3);
        client.fail_fetch(ids[1], ProtocolErrorKind::Unfetchable);
        let mut fetcher = BatchFetcher::new(ids.clone(), FetchRequest::AllButBody, 100);
        let mut report = ErrorReport::new();

        let batches = drain(&mut fetcher, &mut client, &mut report);

        assert_eq!(batches.len(), 1);
        let returned: Vec<_> = batches[0].in_order().map(|(id, _)| id).collect();
        assert_eq!(returned, vec![ids[0], ids[2]]);
        assert_eq!(batches[0].failed, vec![ids[1]]);
        assert_eq!(report.unfetchable.len(), 1);
        assert_eq!(report.unfetchable[0].transient_id, ids[1]);
    }

    #[test]
    fn test_every_id_consumed_once() {
        let (mut client, ids) = mailbox(23);
        client.fail_fetch(ids[4], ProtocolErrorKind::Unparseable);
        client.fail_bulk_fetch(ids[9], ProtocolErrorKind::Unfetchable);
        client.return_empty(ids[15]);
        let mut fetcher = BatchFetcher::new(ids.clone(), FetchRequest::AllButBody, 4);
        let mut report = ErrorReport::new();

        let batches = drain(&mut fetcher, &mut client, &mut report);

        let mut seen = Vec::new();
        for batch in &batches {
            seen.extend(batch.in_order().map(|(id, _)| id));
            seen.extend(batch.failed.iter().copied());
            seen.extend(batch.empty());
        }
        let unique: BTreeSet<_> = seen.iter().copied().collect();
        assert_eq!(seen.len(), ids.len());
        assert_eq!(unique, ids.iter().copied().collect());
        assert_eq!(batches.len(), 6);
        assert_eq!(batches[3].empty().collect::<Vec<_>>(), vec![ids[15]]);
    }

    #[test]
    fn test_reset_restarts_from_the_beginning() {
        let (mut client, ids) = mailbox(5);
        let mut fetcher = BatchFetcher::new(ids, FetchRequest::StableIdOnly, 2);
        let mut report = ErrorReport::new();

        assert_eq!(drain(&mut fetcher, &mut client, &mut report).len(), 3);
        assert_eq!(fetcher.remaining(), 0);

        fetcher.reset();
        assert_eq!(fetcher.remaining(), 5);
        assert_eq!(drain(&mut fetcher, &mut client, &mut report).len(), 3);
    }

    #[test]
    fn test_aborted_bulk_fetch_reconnects_before_fallback() {
        let (mut client, ids) = mailbox(3);
        client.fail_bulk_fetch(ids[0], ProtocolErrorKind::Abort);
        let mut fetcher = BatchFetcher::new(ids.clone(), FetchRequest::AllButBody, 10);
        let mut report = ErrorReport::new();

        let batches = drain(&mut fetcher, &mut client, &mut report);

        assert_eq!(batches[0].items.len(), 3);
        assert_eq!(client.reconnection_count(), 1);
        assert!(report.unfetchable.is_empty());
    }
}
