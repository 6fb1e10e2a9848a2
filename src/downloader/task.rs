//! Download task structures and state tracking

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{ClientError, ClientResult};

/// Lifecycle state of a product download
///
/// ```text
/// Pending ──► InProgress ──► Completed
///    │            │  ▲
///    │            ▼  │
///    ├──────► Resuming ──► Failed
///    └──────────────────────► Failed / Completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Not started
    #[default]
    Pending,
    /// Bytes are being transferred
    InProgress,
    /// Verified and moved to its destination
    Completed,
    /// Gave up; see the task's error
    Failed,
    /// Interrupted with valid progress on disk
    Resuming,
}

impl TaskState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Resuming)
                | (Pending, Completed)
                | (Pending, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Resuming)
                | (Resuming, InProgress)
                | (Resuming, Failed)
        )
    }

    /// Whether no further transitions happen in this run.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Pending => "PENDING",
            TaskState::InProgress => "IN_PROGRESS",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Resuming => "RESUMING",
        };
        f.write_str(label)
    }
}

/// One product's download, owned by the worker executing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Catalog identifier of the product
    pub product_id: String,
    /// Final location of the verified archive
    pub destination_path: PathBuf,
    /// Bytes durably written to the partial file
    pub byte_range_completed: u64,
    /// Transfer attempts made across runs
    pub attempt_count: u32,
    /// Current state
    pub state: TaskState,
    /// Last error, as displayed
    pub error: Option<String>,
    /// Error class of the last error (see [`ClientError::kind`])
    pub error_kind: Option<String>,
}

impl DownloadTask {
    /// Create a pending task.
    pub fn new(product_id: impl Into<String>, destination_path: PathBuf) -> Self {
        Self {
            product_id: product_id.into(),
            destination_path,
            byte_range_completed: 0,
            attempt_count: 0,
            state: TaskState::Pending,
            error: None,
            error_kind: None,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: TaskState) -> ClientResult<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(ClientError::Validation(format!(
                "illegal state transition for {}: {} -> {}",
                self.product_id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Record `err` and move to FAILED.
    pub fn fail(&mut self, err: &ClientError) {
        self.error = Some(err.to_string());
        self.error_kind = Some(err.kind().to_string());
        // Every non-terminal state may fail; a completed task is never downgraded.
        if self.state != TaskState::Completed {
            self.state = TaskState::Failed;
        }
    }
}
