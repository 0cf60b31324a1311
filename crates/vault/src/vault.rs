//! Vault facade
//!
//! Entry points for a full backup or restore of one account. Each call runs
//! the passes selected by its [`Scope`] and returns the accumulated
//! [`ErrorReport`], also when a pass aborts (see [`VaultError::Interrupted`]).

use log::{error, info, warn};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::archive::ArchiveStore;
use crate::client::{MailClient, SearchQuery};
use crate::error::{Result, VaultError};
use crate::models::{ErrorReport, MessageKind};
use crate::progress::ProgressStore;
use crate::restore::{RestoreEngine, RestoreOptions};
use crate::settings::VaultSettings;
use crate::sync::{DeletionReconciler, SyncEngine, SyncOptions};

/// Message kinds covered by a call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    Everything,
    EmailsOnly,
    ChatsOnly,
}

impl Scope {
    pub fn kinds(&self) -> &'static [MessageKind] {
        match self {
            Scope::Everything => &[MessageKind::Email, MessageKind::Chat],
            Scope::EmailsOnly => &[MessageKind::Email],
            Scope::ChatsOnly => &[MessageKind::Chat],
        }
    }
}

/// Parameters of [`Vault::sync`]
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub query: SearchQuery,
    pub compress: bool,
    /// Remove archived messages deleted remotely, for the kinds in scope
    pub db_cleaning: bool,
    /// Refuse archives that belong to another login
    pub ownership_checking: bool,
    pub restart: bool,
    pub scope: Scope,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            query: SearchQuery::All,
            compress: true,
            db_cleaning: false,
            ownership_checking: true,
            restart: false,
            scope: Scope::Everything,
        }
    }
}

/// Parameters of [`Vault::restore`]
#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    /// Only restore messages dated on or after this day
    pub since: Option<NaiveDate>,
    pub extra_labels: Vec<String>,
    pub restart: bool,
    pub scope: Scope,
}

/// One account and its archive
pub struct Vault {
    client: Box<dyn MailClient>,
    archive: Arc<dyn ArchiveStore>,
    progress: ProgressStore,
    settings: VaultSettings,
}

impl Vault {
    /// The login is the one checkpoints are kept for
    ///
    /// # Errors
    /// `InvalidSettings` when a batch size or period is out of bounds.
    pub fn new(
        client: Box<dyn MailClient>,
        archive: Arc<dyn ArchiveStore>,
        progress: ProgressStore,
        settings: VaultSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            client,
            archive,
            progress,
            settings,
        })
    }

    pub fn login(&self) -> &str {
        self.progress.login()
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    pub fn archive(&self) -> &Arc<dyn ArchiveStore> {
        &self.archive
    }

    /// Back up the account into the archive
    pub fn sync(&mut self, request: &SyncRequest) -> Result<ErrorReport> {
        let mut report = ErrorReport::new();
        let reconnections = self.client.reconnection_count();
        let outcome = self.run_sync(request, &mut report);
        self.conclude("Sync", outcome, report, reconnections)
    }

    /// Push the archive back to the account
    pub fn restore(&mut self, request: &RestoreRequest) -> Result<ErrorReport> {
        let mut report = ErrorReport::new();
        let reconnections = self.client.reconnection_count();
        let outcome = self.run_restore(request, &mut report);
        self.conclude("Restore", outcome, report, reconnections)
    }

    /// Bind the archive to this login, or refuse it
    pub fn check_ownership(&self, ownership_checking: bool) -> Result<()> {
        let login = self.login();
        let owners = self.archive.owners()?;

        if owners.is_empty() {
            info!("Registering {} as owner of {}", login, self.archive.location());
            self.archive.store_owner(login)?;
            return Ok(());
        }
        if owners.iter().any(|owner| owner == login) {
            return Ok(());
        }
        if ownership_checking {
            return Err(VaultError::OwnershipConflict {
                archive: self.archive.location(),
                owners,
                login: login.to_string(),
            });
        }

        warn!(
            "Archive {} already belongs to {}. Adding {} as another owner",
            self.archive.location(),
            owners.join(", "),
            login
        );
        self.archive.store_owner(login)?;
        Ok(())
    }

    fn run_sync(&mut self, request: &SyncRequest, report: &mut ErrorReport) -> Result<()> {
        self.check_ownership(request.ownership_checking)?;

        let options = SyncOptions {
            query: request.query.clone(),
            compress: request.compress,
            restart: request.restart,
        };
        for kind in request.scope.kinds() {
            SyncEngine::new(
                self.client.as_mut(),
                self.archive.as_ref(),
                &self.progress,
                &self.settings,
            )
            .run(*kind, &options, report)?;
        }

        if !request.db_cleaning {
            return Ok(());
        }
        if self.archive.owners()?.len() > 1 {
            warn!(
                "Archive {} has several owners. Skipping archive cleaning",
                self.archive.location()
            );
            return Ok(());
        }

        let mut reconciler = DeletionReconciler::new(
            self.client.as_mut(),
            self.archive.as_ref(),
            self.settings.deletion_group_size,
        );
        let mut deleted = 0;
        for kind in request.scope.kinds() {
            deleted += reconciler.run(*kind)?.len();
        }
        info!("Archive cleaning removed {} messages", deleted);
        Ok(())
    }

    fn run_restore(&mut self, request: &RestoreRequest, report: &mut ErrorReport) -> Result<()> {
        let options = RestoreOptions {
            since: request.since,
            extra_labels: request.extra_labels.clone(),
            restart: request.restart,
        };
        for kind in request.scope.kinds() {
            RestoreEngine::new(
                self.client.as_mut(),
                Arc::clone(&self.archive),
                &self.progress,
                &self.settings,
            )
            .run(*kind, &options, report)?;
        }
        Ok(())
    }

    fn conclude(
        &self,
        operation: &str,
        outcome: Result<()>,
        mut report: ErrorReport,
        reconnections_before: usize,
    ) -> Result<ErrorReport> {
        report.reconnections += self.client.reconnection_count() - reconnections_before;
        match outcome {
            Ok(()) => {
                info!("{} of {} done. {}", operation, self.login(), report.summary());
                Ok(report)
            }
            Err(err) => {
                error!(
                    "{} of {} aborted: {}. {}",
                    operation,
                    self.login(),
                    err,
                    report.summary()
                );
                Err(VaultError::interrupted(err, report))
            }
        }
    }
}
