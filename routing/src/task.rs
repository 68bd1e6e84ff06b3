//! Task model
//!
//! A [`Task`] is a natural-language request that needs a model completion.
//! Everything except [`Task::state`] is fixed at submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Rough characters-per-token ratio used when the caller gives no size hint.
const CHARS_PER_TOKEN: usize = 4;

/// Stable task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capabilities a backend may offer and a task may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Accepts image input
    Vision,
    /// Handles prompts beyond the long-context threshold
    LongContext,
    /// Supports function/tool calling
    ToolUse,
    /// Can be constrained to emit JSON
    JsonMode,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vision => write!(f, "vision"),
            Self::LongContext => write!(f, "long_context"),
            Self::ToolUse => write!(f, "tool_use"),
            Self::JsonMode => write!(f, "json_mode"),
        }
    }
}

/// Lifecycle state of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, not yet handed to the executor
    Pending,
    /// Waiting for an admission slot
    Queued,
    /// Admitted; attempts in progress
    Running,
    Succeeded,
    Failed,
    /// Removed from the queue before admission
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A routable request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Prompt text sent to the backend
    pub description: String,
    /// Estimated prompt size in tokens
    pub estimated_input_size: u64,
    pub required_capabilities: BTreeSet<Capability>,
    /// Relative deadline measured from `submitted_at`
    pub deadline: Option<Duration>,
    /// Upper bound on estimated spend for this task
    pub max_cost: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    pub state: TaskState,
}

impl Task {
    /// Create a task with a generated id and a size estimate derived from the text.
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into();
        let estimated_input_size = estimate_tokens(&description);
        Self {
            id: TaskId::generate(),
            description,
            estimated_input_size,
            required_capabilities: BTreeSet::new(),
            deadline: None,
            max_cost: None,
            submitted_at: Utc::now(),
            state: TaskState::Pending,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    /// Override the token estimate (e.g. when attachments are not in the text).
    pub fn with_input_size(mut self, tokens: u64) -> Self {
        self.estimated_input_size = tokens;
        self
    }

    /// Time left before the deadline, `None` when the task has no deadline.
    ///
    /// Returns `Some(Duration::ZERO)` once the deadline has passed.
    pub fn remaining_time(&self, now: DateTime<Utc>) -> Option<Duration> {
        let deadline = self.deadline?;
        let elapsed = (now - self.submitted_at).to_std().unwrap_or_default();
        Some(deadline.saturating_sub(elapsed))
    }
}

/// Token estimate for raw text.
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
}
