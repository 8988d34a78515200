//! Maintenance procedures built on the reconciliation engine.

pub mod copy;
pub mod dedupe;
pub mod purge;

use crate::reconcile::{BatchSettings, ConfirmMode};
use serde::{Deserialize, Serialize};

pub use copy::{copy_namespace, CopyRequest};
pub use dedupe::dedupe_memories;
pub use purge::{delete_user_records, PurgeRequest};

/// Per-run settings, fixed at the CLI boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunOptions {
    pub mode: ConfirmMode,
    pub batch: BatchSettings,
}

impl RunOptions {
    pub fn new(mode: ConfirmMode, batch: BatchSettings) -> Self {
        Self { mode, batch }
    }
}
