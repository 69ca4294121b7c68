//! Core data models shared by the task pipeline.
//!
//! These types describe the tasks, status mirrors, cached results, indexed
//! chunks, and chat transcripts that flow between the consumer, the
//! ingestion pipeline, and the record store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a task.
///
/// Status only moves forward: `pending → processing → {done, failed}`.
/// `done` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Done,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Done)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }

    /// Check a transition, returning [`StatusError::InvalidTransition`] when
    /// it would move backwards or out of a terminal state.
    pub fn transition_to(&self, next: TaskStatus) -> Result<TaskStatus, StatusError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StatusError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(StatusError::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("unknown task status: {0}")]
    Unknown(String),
}

/// Queue payload produced by the submitter: one URL to process under a task id.
///
/// Field names match the wire format (`{"url": ..., "uuid": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub url: String,
    #[serde(rename = "uuid")]
    pub task_id: String,
}

/// Denormalized status lookup keyed by URL.
///
/// Best-effort mirror of the authoritative task status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlTaskMapping {
    #[serde(rename = "uuid")]
    pub task_id: String,
    pub status: TaskStatus,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One `{role, content}` entry of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Final processed output for a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub summary: String,
    pub sentiment: String,
    #[serde(default)]
    pub conversation: Vec<Turn>,
    pub processed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(url: impl Into<String>, summary: impl Into<String>, sentiment: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            summary: summary.into(),
            sentiment: sentiment.into(),
            conversation: Vec::new(),
            processed_at: Utc::now(),
        }
    }
}

/// Notification published on the results channel when a task completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    #[serde(rename = "uuid")]
    pub task_id: String,
    pub url: String,
    pub result: CacheEntry,
}

/// Metadata stored alongside every indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(rename = "uuid")]
    pub task_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Positional chunk identifier: `{task_id}_chunk_{index}`.
pub fn chunk_id(task_id: &str, index: usize) -> String {
    format!("{}_chunk_{}", task_id, index)
}
