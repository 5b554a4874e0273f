use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Background work handed off from the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Run the deletion cascade for a soft-deleted file.
    CascadeDelete { file_id: Uuid },
    /// Remove the scratch area of a finished or cancelled session.
    PurgeScratch { session_id: Uuid },
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::CascadeDelete { .. } => "cascade_delete",
            TaskKind::PurgeScratch { .. } => "purge_scratch",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    /// Zero-based attempt counter.
    pub attempt: u32,
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            attempt: 0,
            submitted_at: Utc::now(),
        }
    }
}
