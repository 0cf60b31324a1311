//! Domain models for archived mail

mod checkpoint;
mod ids;
mod message;
mod report;

pub use checkpoint::{Checkpoint, OperationType};
pub use ids::{StableId, TransientId};
pub use message::{CHAT_LABEL, MessageKind, MessageMetadata, needs_update};
pub use report::{ErrorReport, LabelFailure, Unfetchable};
