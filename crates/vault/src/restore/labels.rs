//! Background label application
//!
//! The restore loop hands one [`LabelBatch`] per window to a worker thread
//! that owns its own connection. Jobs are applied in submission order and a
//! window's checkpoint is persisted only after its labels were applied, so a
//! later checkpoint is never written before an earlier one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::archive::ArchiveStore;
use crate::classify::ErrorClassifier;
use crate::client::{Folder, MailClient};
use crate::error::{Result, VaultError};
use crate::models::{ErrorReport, LabelFailure, OperationType, StableId, TransientId};
use crate::progress::ProgressStore;
use crate::sync::timing::Timer;

/// Labels of one restore window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelBatch {
    /// Transient ids (in All Mail) to tag with each label
    pub labels: BTreeMap<String, Vec<TransientId>>,
    /// Archived message behind each transient id
    pub origins: BTreeMap<TransientId, StableId>,
    /// Checkpoint to persist once the labels are applied
    pub last_id: StableId,
    /// Messages in the window
    pub nb_items: usize,
    /// Submission order, starting at 0
    pub sequence: usize,
}

impl LabelBatch {
    /// Stable ids behind a set of transient ids
    pub fn stable_ids(&self, ids: &[TransientId]) -> Vec<StableId> {
        ids.iter()
            .filter_map(|id| self.origins.get(id).copied())
            .collect()
    }
}

/// Work items consumed by the label worker
#[derive(Debug)]
pub enum LabelJob {
    Batch(LabelBatch),
    /// Ends the worker once every earlier job is done
    Stop,
}

/// Sent back by the worker after a batch is applied and checkpointed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobAck {
    pub sequence: usize,
    pub last_id: StableId,
    /// Labels applied without error
    pub applied: usize,
    /// Labels that failed and were recorded
    pub failed: usize,
}

struct WorkerOutcome {
    report: ErrorReport,
    error: Option<VaultError>,
}

/// Handle on a running label worker
pub struct LabelPipeline {
    jobs: Option<Sender<LabelJob>>,
    acks: Receiver<JobAck>,
    worker: Option<JoinHandle<WorkerOutcome>>,
    submitted: usize,
}

impl LabelPipeline {
    /// Start a worker on its own connection
    ///
    /// `total` is the number of messages expected, for progress lines.
    pub fn spawn(
        client: Box<dyn MailClient>,
        archive: Arc<dyn ArchiveStore>,
        progress: ProgressStore,
        op: OperationType,
        classifier: ErrorClassifier,
        total: usize,
    ) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel();
        let (ack_tx, ack_rx) = mpsc::channel();

        let worker = Worker {
            client,
            archive,
            progress,
            op,
            classifier,
            total,
            report: ErrorReport::new(),
        };
        let handle = thread::Builder::new()
            .name(format!("{}-labels", op))
            .spawn(move || worker.run(job_rx, ack_tx))
            .map_err(|err| anyhow::anyhow!("Failed to start label worker: {}", err))?;

        Ok(Self {
            jobs: Some(job_tx),
            acks: ack_rx,
            worker: Some(handle),
            submitted: 0,
        })
    }

    /// Queue a window's labels
    ///
    /// # Errors
    /// `LabelWorkerStopped` if the worker has exited; [`finish`](Self::finish)
    /// then returns why.
    pub fn submit(&mut self, mut batch: LabelBatch) -> Result<()> {
        batch.sequence = self.submitted;
        let jobs = self.jobs.as_ref().ok_or(VaultError::LabelWorkerStopped)?;
        jobs.send(LabelJob::Batch(batch))
            .map_err(|_| VaultError::LabelWorkerStopped)?;
        self.submitted += 1;
        Ok(())
    }

    /// Acknowledgements received since the last call
    pub fn acknowledged(&self) -> Vec<JobAck> {
        self.acks.try_iter().collect()
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Stop the worker after the queued jobs and collect its report
    ///
    /// The report includes the worker connection's reconnections. A worker
    /// that stopped on an unclassified failure yields `Interrupted` carrying
    /// what it recorded before failing.
    pub fn finish(mut self) -> Result<ErrorReport> {
        if let Some(jobs) = self.jobs.take() {
            // fails only if the worker is already gone
            let _ = jobs.send(LabelJob::Stop);
        }
        let handle = self.worker.take().ok_or(VaultError::LabelWorkerStopped)?;
        let outcome = handle.join().map_err(|_| {
            error!("Label worker panicked");
            VaultError::LabelWorkerStopped
        })?;

        match outcome.error {
            Some(err) => Err(VaultError::interrupted(err, outcome.report)),
            None => Ok(outcome.report),
        }
    }
}

impl Drop for LabelPipeline {
    fn drop(&mut self) {
        if let Some(jobs) = self.jobs.take() {
            let _ = jobs.send(LabelJob::Stop);
        }
    }
}

struct Worker {
    client: Box<dyn MailClient>,
    archive: Arc<dyn ArchiveStore>,
    progress: ProgressStore,
    op: OperationType,
    classifier: ErrorClassifier,
    total: usize,
    report: ErrorReport,
}

impl Worker {
    fn run(mut self, jobs: Receiver<LabelJob>, acks: Sender<JobAck>) -> WorkerOutcome {
        let result = self.consume(jobs, acks);
        self.client.disconnect();
        self.report.reconnections = self.client.reconnection_count();
        WorkerOutcome {
            report: self.report,
            error: result.err(),
        }
    }

    fn consume(&mut self, jobs: Receiver<LabelJob>, acks: Sender<JobAck>) -> Result<()> {
        self.client.select_folder(&Folder::AllMail)?;
        let timer = Timer::start();
        let mut processed = 0;

        // a closed channel ends the worker like Stop
        while let Ok(job) = jobs.recv() {
            let batch = match job {
                LabelJob::Batch(batch) => batch,
                LabelJob::Stop => break,
            };

            let (applied, failed) = self.apply(&batch)?;
            self.progress.save(self.op, batch.last_id)?;

            processed += batch.nb_items;
            let left = self.total.saturating_sub(processed);
            info!(
                "Labelled {} messages, {} left. Estimated time left: {}",
                processed,
                left,
                timer.eta(processed, left)
            );

            let ack = JobAck {
                sequence: batch.sequence,
                last_id: batch.last_id,
                applied,
                failed,
            };
            if acks.send(ack).is_err() {
                debug!("Nobody listens for label acknowledgements");
            }
        }

        Ok(())
    }

    fn apply(&mut self, batch: &LabelBatch) -> Result<(usize, usize)> {
        let (mut applied, mut failed) = (0, 0);

        for (label, ids) in &batch.labels {
            let Err(err) = self.client.apply_labels_to(ids, std::slice::from_ref(label)) else {
                applied += 1;
                continue;
            };

            let stable_ids = batch.stable_ids(ids);
            let Some(representative) = stable_ids.first().copied() else {
                return Err(VaultError::Protocol(err));
            };
            warn!(
                "Cannot apply label {} to {} messages: {}",
                label,
                ids.len(),
                err
            );
            let reason = err.to_string();
            self.classifier.handle_restore_error(
                err,
                representative,
                self.client.as_mut(),
                self.archive.as_ref(),
                &mut self.report,
            )?;
            self.report.record_label_failure(LabelFailure {
                label: label.clone(),
                stable_ids,
                reason,
            });
            self.client.select_folder(&Folder::AllMail)?;
            failed += 1;
        }

        Ok((applied, failed))
    }
}
