//! Backup side: batched fetching, the sync pass and deletion reconciliation

mod engine;
mod fetcher;
mod reconcile;
pub mod timing;

pub use engine::{SyncEngine, SyncOptions, SyncStats, folder_for};
pub use fetcher::{BatchFetcher, FetchBatch};
pub use reconcile::DeletionReconciler;
