use thiserror::Error;

use super::WorkerState;
use crate::cache::StorageError;

#[derive(Error, Debug)]
pub enum WorkerError {
    /// A precache manifest entry could not be fetched. This version never
    /// activates; whatever version was active before keeps serving.
    #[error("Installation failed: {url}: {reason}")]
    Installation { url: String, reason: String },

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidState { from: WorkerState, to: WorkerState },

    #[error(transparent)]
    Storage(#[from] StorageError),
}
