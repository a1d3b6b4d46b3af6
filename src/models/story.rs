//! Story data models.
//!
//! `viewed_by` drives seen state and only ever grows. `viewer_ids` is the
//! display roster behind the view counter; the two are kept apart on purpose.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ReactionKind {
    Fire,
    Heart,
    Laugh,
    Wow,
    Sad,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 5] = [
        ReactionKind::Fire,
        ReactionKind::Heart,
        ReactionKind::Laugh,
        ReactionKind::Wow,
        ReactionKind::Sad,
    ];

    pub fn emoji(&self) -> &'static str {
        match self {
            ReactionKind::Fire => "🔥",
            ReactionKind::Heart => "❤️",
            ReactionKind::Laugh => "😂",
            ReactionKind::Wow => "😮",
            ReactionKind::Sad => "😢",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: Uuid,
    pub author_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Reply {
    pub fn new(author_id: i64, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id,
            text,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub id: Uuid,
    pub owner_id: i64,
    pub media_ref: String,
    pub created_at: DateTime<Utc>,
    pub viewed_by: BTreeSet<i64>,
    pub reaction: Option<ReactionKind>,
    pub replies: Vec<Reply>,
    pub viewer_ids: Vec<i64>,
    pub caption: Option<String>,
}

impl Story {
    pub fn new(owner_id: i64, media_ref: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            media_ref: media_ref.into(),
            created_at,
            viewed_by: BTreeSet::new(),
            reaction: None,
            replies: Vec::new(),
            viewer_ids: Vec::new(),
            caption: None,
        }
    }

    /// Decorative counter shown to the owner; unrelated to seen state.
    pub fn view_count(&self) -> usize {
        self.viewer_ids.len()
    }

    pub fn is_viewed_by(&self, viewer_id: i64) -> bool {
        self.viewed_by.contains(&viewer_id)
    }

    /// Returns `true` if the viewer was newly recorded.
    pub fn mark_viewed_by(&mut self, viewer_id: i64) -> bool {
        self.viewed_by.insert(viewer_id)
    }
}

/// Serialized form of a [`Story`]; `viewed_by` is stored as a sorted list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRecord {
    pub id: Uuid,
    pub owner_id: i64,
    pub media_ref: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub viewed_by: Vec<i64>,
    #[serde(default)]
    pub reaction: Option<ReactionKind>,
    #[serde(default)]
    pub replies: Vec<Reply>,
    #[serde(default)]
    pub viewer_ids: Vec<i64>,
    #[serde(default)]
    pub caption: Option<String>,
}

impl From<&Story> for StoryRecord {
    fn from(story: &Story) -> Self {
        Self {
            id: story.id,
            owner_id: story.owner_id,
            media_ref: story.media_ref.clone(),
            created_at: story.created_at,
            viewed_by: story.viewed_by.iter().copied().collect(),
            reaction: story.reaction,
            replies: story.replies.clone(),
            viewer_ids: story.viewer_ids.clone(),
            caption: story.caption.clone(),
        }
    }
}

impl From<StoryRecord> for Story {
    fn from(record: StoryRecord) -> Self {
        Self {
            id: record.id,
            owner_id: record.owner_id,
            media_ref: record.media_ref,
            created_at: record.created_at,
            viewed_by: record.viewed_by.into_iter().collect(),
            reaction: record.reaction,
            replies: record.replies,
            viewer_ids: record.viewer_ids,
            caption: record.caption,
        }
    }
}
