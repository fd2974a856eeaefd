use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "lesson_progress_status", rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// One learner's engagement state with one lesson. Exactly one row exists
/// per (lesson, student) pair, created lazily on first view or update.
#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct ProgressRecord {
    pub id: i32,
    pub lesson_id: i32,
    pub student_user_id: i32,
    pub status: ProgressStatus,
    pub completion_percentage: i32,
    pub video_progress: i32,
    pub documents_read: i32,
    pub total_documents: i32,
    pub time_spent_minutes: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
