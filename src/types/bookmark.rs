use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned bookmark identifier.
pub type BookmarkId = String;

/// A saved bookmark as materialized by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    pub id: BookmarkId,
    pub title: String,
    pub url: String,
    /// Owning user. Serialized under the backend's column name.
    #[serde(rename = "user_id")]
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

/// Payload submitted to the backend when creating a bookmark.
/// The backend assigns `id` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
    #[serde(rename = "user_id")]
    pub owner: String,
}
