//! Restoring archived messages to a mailbox

mod engine;
mod labels;

pub use engine::{RestoreEngine, RestoreOptions, RestoreStats};
pub use labels::{JobAck, LabelBatch, LabelJob, LabelPipeline};
