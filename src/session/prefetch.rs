//! Prefetch window planning.
//!
//! Nearer items get higher absolute priorities so the cache can evict with a
//! single linear sort.

use crate::models::MediaRef;

use super::state::SessionState;

pub const CURRENT_PRIORITY: i64 = 120;
pub const LOOKAHEAD_BASE: i64 = 100;
pub const LOOKAHEAD_LEN: usize = 7;
pub const NEXT_USER_BASE: i64 = 80;
pub const NEXT_USER_LEN: usize = 3;
pub const BACKWARD_BASE: i64 = 70;
pub const BACKWARD_LEN: usize = 2;
pub const SECOND_USER_BASE: i64 = 60;
pub const SECOND_USER_LEN: usize = 2;

/// Builds the `(key, priority)` batch for the current position.
///
/// `media_refs` returns the ordered media references of a user index (empty
/// for unknown users). Video and inline references are skipped.
pub fn plan_windows(
    state: &SessionState,
    media_refs: &dyn Fn(usize) -> Vec<String>,
) -> Vec<(String, i64)> {
    if !state.presenting {
        return Vec::new();
    }

    let mut batch = Vec::new();
    let current = media_refs(state.current_user_index);
    let story = state.current_story_index;

    if let Some(media) = current.get(story) {
        push(&mut batch, media, CURRENT_PRIORITY);
    }

    for (offset, media) in current.iter().skip(story + 1).take(LOOKAHEAD_LEN).enumerate() {
        push(&mut batch, media, LOOKAHEAD_BASE - offset as i64);
    }

    if let Some(&next_user) = state.viewing_order.get(state.position_in_order + 1) {
        for (offset, media) in media_refs(next_user).iter().take(NEXT_USER_LEN).enumerate() {
            push(&mut batch, media, NEXT_USER_BASE - offset as i64);
        }
    }

    for (offset, media) in current[..story.min(current.len())]
        .iter()
        .rev()
        .take(BACKWARD_LEN)
        .enumerate()
    {
        push(&mut batch, media, BACKWARD_BASE - offset as i64);
    }

    if let Some(&second_user) = state.viewing_order.get(state.position_in_order + 2) {
        for (offset, media) in media_refs(second_user).iter().take(SECOND_USER_LEN).enumerate() {
            push(&mut batch, media, SECOND_USER_BASE - offset as i64);
        }
    }

    batch
}

fn push(batch: &mut Vec<(String, i64)>, media: &str, priority: i64) {
    if let MediaRef::Remote(url) = MediaRef::parse(media) {
        batch.push((url.to_string(), priority));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::planner::plan;

    fn refs(index: usize) -> Vec<String> {
        match index {
            0 => (0..10).map(|i| format!("https://m/u0/{i}.jpg")).collect(),
            1 => vec![
                "https://m/u1/0.jpg".into(),
                "video://https://m/u1/1.mp4".into(),
                "https://m/u1/2.jpg".into(),
                "https://m/u1/3.jpg".into(),
            ],
            2 => vec![
                "data:image;base64,AAAA".into(),
                "https://m/u2/1.jpg".into(),
                "https://m/u2/2.jpg".into(),
            ],
            _ => Vec::new(),
        }
    }

    fn state_at(story: usize) -> SessionState {
        let mut state = SessionState::new();
        state.begin(plan(0, Some(&[0, 1, 2]), 3), 0, story);
        state
    }

    #[test]
    fn test_windows_and_priorities() {
        let batch = plan_windows(&state_at(3), &refs);
        let priority_of = |key: &str| {
            batch
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, priority)| *priority)
        };

        assert_eq!(priority_of("https://m/u0/3.jpg"), Some(CURRENT_PRIORITY));
        assert_eq!(priority_of("https://m/u0/4.jpg"), Some(100));
        assert_eq!(priority_of("https://m/u0/9.jpg"), Some(95));
        assert_eq!(priority_of("https://m/u1/0.jpg"), Some(80));
        assert_eq!(priority_of("https://m/u1/2.jpg"), Some(78));
        assert_eq!(priority_of("https://m/u1/3.jpg"), None);
        assert_eq!(priority_of("https://m/u0/2.jpg"), Some(70));
        assert_eq!(priority_of("https://m/u0/1.jpg"), Some(69));
        assert_eq!(priority_of("https://m/u0/0.jpg"), None);
        assert_eq!(priority_of("https://m/u2/1.jpg"), Some(59));
        assert_eq!(priority_of("https://m/u2/2.jpg"), None);
    }

    #[test]
    fn test_non_prefetchable_refs_are_skipped() {
        let batch = plan_windows(&state_at(0), &refs);
        assert!(batch.iter().all(|(key, _)| key.starts_with("https://")));
        assert!(!batch.iter().any(|(key, _)| key.contains(".mp4")));
    }

    #[test]
    fn test_lookahead_is_capped() {
        let batch = plan_windows(&state_at(0), &refs);
        let lookahead = batch
            .iter()
            .filter(|(key, priority)| {
                key.starts_with("https://m/u0/") && *priority <= LOOKAHEAD_BASE
            })
            .count();
        assert_eq!(lookahead, LOOKAHEAD_LEN);
    }

    #[test]
    fn test_idle_session_plans_nothing() {
        assert!(plan_windows(&SessionState::new(), &refs).is_empty());
    }
}
