//! Pushing archived messages back to the remote mailbox

use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::labels::{LabelBatch, LabelPipeline};
use crate::archive::ArchiveStore;
use crate::classify::ErrorClassifier;
use crate::client::{Folder, MailClient};
use crate::error::{Result, VaultError};
use crate::models::{ErrorReport, LabelFailure, MessageKind, OperationType, StableId};
use crate::progress::{ProgressStore, suffix_after};
use crate::settings::VaultSettings;
use crate::sync::timing::{Timer, human_duration};

/// Per-pass options
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Only restore records dated on or after this day
    pub since: Option<NaiveDate>,
    /// Labels added to every restored message
    pub extra_labels: Vec<String>,
    /// Resume after the last checkpoint
    pub restart: bool,
}

/// Totals of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreStats {
    /// Records selected, after resuming
    pub total: usize,
    pub pushed: usize,
    pub windows: usize,
    pub elapsed: Duration,
}

/// Restores one message kind from the archive
///
/// Messages are appended while the scratch folder is selected, one window
/// at a time. Labels are then applied per window with one command per
/// distinct label, either inline or by a [`LabelPipeline`].
pub struct RestoreEngine<'a> {
    client: &'a mut dyn MailClient,
    archive: Arc<dyn ArchiveStore>,
    progress: &'a ProgressStore,
    settings: &'a VaultSettings,
    classifier: ErrorClassifier,
    /// Labels known to exist remotely
    existing_labels: BTreeSet<String>,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(
        client: &'a mut dyn MailClient,
        archive: Arc<dyn ArchiveStore>,
        progress: &'a ProgressStore,
        settings: &'a VaultSettings,
    ) -> Self {
        Self {
            client,
            archive,
            progress,
            settings,
            classifier: ErrorClassifier::new(settings.reconnect_backoff()),
            existing_labels: BTreeSet::new(),
        }
    }

    /// Run one pass; recovered failures land in `report`
    pub fn run(
        &mut self,
        kind: MessageKind,
        options: &RestoreOptions,
        report: &mut ErrorReport,
    ) -> Result<RestoreStats> {
        self.settings.validate()?;
        let timer = Timer::start();
        let op = OperationType::restore(kind);

        let mut ids = self.archive.list_ids(kind, options.since)?;
        info!("Found {} archived {}s to restore", ids.len(), kind);

        if options.restart {
            ids = self.resume(op, ids)?;
        }

        let mut stats = RestoreStats {
            total: ids.len(),
            ..Default::default()
        };
        if ids.is_empty() {
            return Ok(stats);
        }

        let mut pipeline = if self.settings.background_labelling {
            Some(LabelPipeline::spawn(
                self.client.spawn_connection()?,
                Arc::clone(&self.archive),
                self.progress.clone(),
                op,
                self.classifier.clone(),
                ids.len(),
            )?)
        } else {
            None
        };

        let pushed = self.push_windows(
            op,
            &ids,
            options,
            pipeline.as_mut(),
            &mut stats,
            &timer,
            report,
        );

        let pushed = match pipeline {
            None => pushed,
            Some(pipeline) => match (pushed, pipeline.finish()) {
                (pushed, Ok(worker_report)) => {
                    report.merge(worker_report);
                    pushed
                }
                (Ok(()) | Err(VaultError::LabelWorkerStopped), Err(err)) => {
                    Err(absorb(err, report))
                }
                (Err(err), Err(worker_err)) => {
                    warn!("Label worker failed too: {}", worker_err);
                    absorb(worker_err, report);
                    Err(err)
                }
            },
        };
        pushed?;

        stats.elapsed = timer.elapsed();
        info!(
            "{} restore done in {}: {} of {} pushed",
            kind,
            human_duration(stats.elapsed),
            stats.pushed,
            stats.total
        );
        Ok(stats)
    }

    fn resume(&mut self, op: OperationType, ids: Vec<StableId>) -> Result<Vec<StableId>> {
        let Some(last) = self.progress.load(op)? else {
            info!("No {} checkpoint. Restoring all {} records", op, ids.len());
            return Ok(ids);
        };
        match suffix_after(&ids, &last) {
            Some(rest) => {
                info!(
                    "Resuming {} after {}: {} of {} records left",
                    op,
                    last,
                    rest.len(),
                    ids.len()
                );
                Ok(rest.to_vec())
            }
            None => {
                warn!(
                    "Checkpointed id {} is not in the archive selection. Restoring all {} records",
                    last,
                    ids.len()
                );
                Ok(ids)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_windows(
        &mut self,
        op: OperationType,
        ids: &[StableId],
        options: &RestoreOptions,
        mut pipeline: Option<&mut LabelPipeline>,
        stats: &mut RestoreStats,
        timer: &Timer,
        report: &mut ErrorReport,
    ) -> Result<()> {
        let scratch = self.settings.restore_folder.clone();
        self.client.select_folder(&scratch)?;

        let mut done = 0;
        for window in ids.chunks(self.settings.restore_batch_size) {
            let Some(last_id) = window.last().copied() else {
                continue;
            };
            let batch = self.push_window(window, last_id, options, report)?;
            stats.pushed += batch.origins.len();
            stats.windows += 1;
            self.create_missing_labels(&batch)?;

            match pipeline.as_deref_mut() {
                Some(pipeline) => {
                    pipeline.submit(batch)?;
                    for ack in pipeline.acknowledged() {
                        debug!("Labels of window {} applied up to {}", ack.sequence, ack.last_id);
                    }
                }
                None => {
                    self.apply_labels(&batch, report)?;
                    self.client.select_folder(&scratch)?;
                    self.progress.save(op, last_id)?;
                }
            }

            done += window.len();
            let left = ids.len() - done;
            info!(
                "Restored {} records, {} left. Estimated time left: {}",
                done,
                left,
                timer.eta(done, left)
            );
        }

        Ok(())
    }

    /// Append every message of a window and group the results by label
    fn push_window(
        &mut self,
        window: &[StableId],
        last_id: StableId,
        options: &RestoreOptions,
        report: &mut ErrorReport,
    ) -> Result<LabelBatch> {
        let mut batch = LabelBatch {
            last_id,
            nb_items: window.len(),
            ..Default::default()
        };

        for id in window {
            let (record, body) = self
                .archive
                .unbury(*id)?
                .ok_or(VaultError::MissingRecord(*id))?;
            if record.quarantined {
                debug!("{} is quarantined. Trying it anyway", id);
            }

            let pushed = self.client.push_data(
                &Folder::AllMail,
                &body,
                &record.metadata.flags,
                record.metadata.internal_date,
            );
            let transient_id = match pushed {
                Ok(transient_id) => transient_id,
                Err(err) => {
                    self.classifier.handle_restore_error(
                        err,
                        *id,
                        self.client,
                        self.archive.as_ref(),
                        report,
                    )?;
                    continue;
                }
            };

            batch.origins.insert(transient_id, *id);
            let labels = record
                .metadata
                .labels
                .iter()
                .chain(options.extra_labels.iter());
            for label in labels {
                let ids = batch.labels.entry(label.clone()).or_default();
                if !ids.contains(&transient_id) {
                    ids.push(transient_id);
                }
            }
        }

        Ok(batch)
    }

    /// Create the window's labels not known yet, once
    fn create_missing_labels(&mut self, batch: &LabelBatch) -> Result<()> {
        let to_create: BTreeSet<String> = batch
            .labels
            .keys()
            .filter(|label| !self.existing_labels.contains(*label))
            .cloned()
            .collect();
        if to_create.is_empty() {
            return Ok(());
        }
        debug!("Creating {} labels", to_create.len());
        self.existing_labels = self
            .client
            .create_labels(&to_create, &self.existing_labels)?;
        Ok(())
    }

    /// One command per distinct label, from All Mail
    fn apply_labels(&mut self, batch: &LabelBatch, report: &mut ErrorReport) -> Result<()> {
        if batch.labels.is_empty() {
            return Ok(());
        }
        self.client.select_folder(&Folder::AllMail)?;

        for (label, ids) in &batch.labels {
            let Err(err) = self.client.apply_labels_to(ids, std::slice::from_ref(label)) else {
                continue;
            };
            let stable_ids = batch.stable_ids(ids);
            let Some(representative) = stable_ids.first().copied() else {
                return Err(VaultError::Protocol(err));
            };
            warn!("Cannot apply label {} to {} messages: {}", label, ids.len(), err);
            let reason = err.to_string();
            self.classifier.handle_restore_error(
                err,
                representative,
                self.client,
                self.archive.as_ref(),
                report,
            )?;
            report.record_label_failure(LabelFailure {
                label: label.clone(),
                stable_ids,
                reason,
            });
            self.client.select_folder(&Folder::AllMail)?;
        }

        Ok(())
    }
}

/// Fold the report of an interrupted worker into `report`
fn absorb(err: VaultError, report: &mut ErrorReport) -> VaultError {
    match err {
        VaultError::Interrupted {
            report: worker_report,
            source,
        } => {
            report.merge(*worker_report);
            *source
        }
        other => other,
    }
}
