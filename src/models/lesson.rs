use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "lesson_content_type", rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Video,
    Document,
    Mixed,
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "lesson_sharing_mode", rename_all = "snake_case")]
pub enum SharingMode {
    Private,
    ClassRestricted,
    CustomExclusion,
    Public,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct Lesson {
    pub id: i32,
    pub teacher_user_id: i32,
    pub course_id: Option<i32>,
    pub title: String,
    pub description: Option<String>,
    pub content_type: ContentType,
    pub sharing_mode: SharingMode,
    pub is_published: bool,
    pub position: i32,
    pub video_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lesson {
    /// A video signal only counts as attached media when the reference
    /// is non-empty.
    pub fn has_video(&self) -> bool {
        self.video_url
            .as_deref()
            .map(|url| !url.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct LessonDocument {
    pub id: i32,
    pub lesson_id: i32,
    pub title: String,
    pub url: String,
    pub position: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct LessonGroupLink {
    pub lesson_id: i32,
    pub group_id: i32,
    pub is_active: bool,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct LessonExclusion {
    pub lesson_id: i32,
    pub student_user_id: i32,
    pub reason: Option<String>,
    pub excluded_at: DateTime<Utc>,
}
