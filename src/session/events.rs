use serde::Serialize;
use uuid::Uuid;

use crate::models::ReactionKind;

use super::state::SessionSnapshot;

/// Notifications emitted after each engine mutation. The rendering layer
/// subscribes and turns these into redraws.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    StateChanged {
        snapshot: SessionSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    StoryViewed {
        user_id: i64,
        story_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    ReactionChanged {
        story_id: Uuid,
        reaction: Option<ReactionKind>,
    },
    #[serde(rename_all = "camelCase")]
    ReplySent {
        story_id: Uuid,
        reply_id: Uuid,
    },
    DismissScheduled,
    Dismissed,
}
