//! One backup pass per message kind

use log::{debug, info, warn};
use std::time::Duration;

use super::fetcher::BatchFetcher;
use super::timing::Timer;
use crate::archive::ArchiveStore;
use crate::classify::ErrorClassifier;
use crate::client::{FetchRequest, FetchedFields, Folder, MailClient, SearchQuery};
use crate::error::{Result, VaultError};
use crate::models::{ErrorReport, MessageKind, OperationType, StableId, TransientId, needs_update};
use crate::progress::{ProgressStore, suffix_after};
use crate::settings::VaultSettings;

/// Remote folder holding a message kind
pub fn folder_for(kind: MessageKind) -> Folder {
    match kind {
        MessageKind::Email => Folder::AllMail,
        MessageKind::Chat => Folder::Chats,
    }
}

/// Per-pass options
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Remote selection, everything by default
    pub query: SearchQuery,
    /// Store new bodies compressed
    pub compress: bool,
    /// Resume after the last checkpoint
    pub restart: bool,
}

/// Totals of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Ids selected remotely, after resuming
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub elapsed: Duration,
}

impl SyncStats {
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

enum ItemOutcome {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

/// Backs up one message kind from the remote mailbox into the archive
pub struct SyncEngine<'a> {
    client: &'a mut dyn MailClient,
    archive: &'a dyn ArchiveStore,
    progress: &'a ProgressStore,
    settings: &'a VaultSettings,
    classifier: ErrorClassifier,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        client: &'a mut dyn MailClient,
        archive: &'a dyn ArchiveStore,
        progress: &'a ProgressStore,
        settings: &'a VaultSettings,
    ) -> Self {
        Self {
            client,
            archive,
            progress,
            settings,
            classifier: ErrorClassifier::new(settings.reconnect_backoff()),
        }
    }

    /// Run one pass; recovered failures land in `report`
    pub fn run(
        &mut self,
        kind: MessageKind,
        options: &SyncOptions,
        report: &mut ErrorReport,
    ) -> Result<SyncStats> {
        self.settings.validate()?;
        let timer = Timer::start();
        let op = OperationType::sync(kind);
        let folder = folder_for(kind);

        if !self.client.is_visible(&folder)? {
            info!(
                "{} folder is not visible. Skipping {} sync",
                self.client.folder_name(&folder),
                kind
            );
            return Ok(SyncStats::default());
        }
        self.client.select_folder(&folder)?;

        let mut ids = self.client.search(&options.query)?;
        info!(
            "Found {} {}s matching {}",
            ids.len(),
            kind,
            options.query.to_protocol()
        );

        if options.restart {
            ids = self.resume(op, ids)?;
        }

        let mut stats = SyncStats {
            total: ids.len(),
            ..Default::default()
        };
        let mut fetcher =
            BatchFetcher::new(ids, FetchRequest::AllButBody, self.settings.fetch_batch_size);
        let mut last_completed: Option<StableId> = None;

        while let Some(batch) =
            fetcher.next_batch(self.client, &self.classifier, self.archive, report)?
        {
            for id in &batch.ids {
                let Some(fields) = batch.items.get(id) else {
                    if !batch.failed.contains(id) {
                        debug!("No metadata returned for {}", id);
                        report.record_empty(*id);
                    }
                    continue;
                };

                match self.process_item(*id, fields, kind, options.compress, report)? {
                    ItemOutcome::Created => stats.created += 1,
                    ItemOutcome::Updated => stats.updated += 1,
                    ItemOutcome::Unchanged => stats.unchanged += 1,
                    ItemOutcome::Skipped => continue,
                }
                last_completed = Some(fields.stable_id);

                let processed = stats.processed();
                if processed % self.settings.checkpoint_every == 0 {
                    self.progress.save(op, fields.stable_id)?;
                }
                if processed % self.settings.progress_every == 0 {
                    info!(
                        "Processed {} {}s, {} left. Estimated time left: {}",
                        processed,
                        kind,
                        fetcher.remaining(),
                        timer.eta(processed, fetcher.remaining())
                    );
                }
            }
        }

        if let Some(last) = last_completed {
            self.progress.save(op, last)?;
        }

        stats.elapsed = timer.elapsed();
        info!(
            "{} sync done in {}: {} created, {} updated, {} unchanged",
            kind,
            super::timing::human_duration(stats.elapsed),
            stats.created,
            stats.updated,
            stats.unchanged
        );
        Ok(stats)
    }

    /// Drop everything up to the checkpointed message
    fn resume(&mut self, op: OperationType, ids: Vec<TransientId>) -> Result<Vec<TransientId>> {
        let Some(last) = self.progress.load(op)? else {
            info!("No {} checkpoint. Processing all {} ids", op, ids.len());
            return Ok(ids);
        };

        let found = self.client.search(&SearchQuery::StableId(last))?;
        match found.first().and_then(|tid| suffix_after(&ids, tid)) {
            Some(rest) => {
                info!(
                    "Resuming {} after {}: {} of {} ids left",
                    op,
                    last,
                    rest.len(),
                    ids.len()
                );
                Ok(rest.to_vec())
            }
            None => {
                warn!(
                    "Checkpointed id {} is no longer in the selection. Processing all {} ids",
                    last,
                    ids.len()
                );
                Ok(ids)
            }
        }
    }

    fn process_item(
        &mut self,
        id: TransientId,
        fields: &FetchedFields,
        kind: MessageKind,
        compress: bool,
        report: &mut ErrorReport,
    ) -> Result<ItemOutcome> {
        let Some(metadata) = fields.metadata.clone() else {
            report.record_empty(id);
            return Ok(ItemOutcome::Skipped);
        };

        if let Some(record) = self.archive.get_record(metadata.stable_id)? {
            if needs_update(&record.metadata, &metadata, kind)? {
                debug!("Updating metadata of {}", metadata.stable_id);
                self.archive.update_metadata(&metadata.archived_as(kind))?;
                return Ok(ItemOutcome::Updated);
            }
            debug!("{} is up to date", metadata.stable_id);
            return Ok(ItemOutcome::Unchanged);
        }

        let body = match self.client.fetch_one(id, FetchRequest::BodyOnly) {
            Ok(Some(body_fields)) => {
                if body_fields.stable_id != metadata.stable_id {
                    return Err(VaultError::StableIdChanged {
                        stored: metadata.stable_id,
                        fetched: body_fields.stable_id,
                    });
                }
                body_fields.body
            }
            Ok(None) => None,
            Err(err) => {
                self.classifier
                    .handle_fetch_error(err, id, self.client, self.archive, report)?;
                return Ok(ItemOutcome::Skipped);
            }
        };
        let Some(body) = body else {
            debug!("No body returned for {}", id);
            report.record_empty(id);
            return Ok(ItemOutcome::Skipped);
        };

        debug!("Archiving new {} {}", kind, metadata.stable_id);
        self.archive
            .bury(&metadata.archived_as(kind), kind, &body, compress)?;
        Ok(ItemOutcome::Created)
    }
}
