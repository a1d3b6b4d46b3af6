use std::{sync::Arc, time::Duration};

use storyreel_lib::{
    cache::{placeholder_png, MediaCache, StaticFetcher},
    models::ReactionKind,
    repository::StoryRepository,
    session::{MediaStatus, PlaybackStatus, SessionEngine, SessionEvent},
    settings::EngineSettings,
    store::MemoryStore,
};
use tokio::{sync::broadcast::Receiver, time};

const VIEWER: i64 = 1000;

struct Harness {
    store: Arc<MemoryStore>,
    repo: Arc<StoryRepository>,
    fetcher: Arc<StaticFetcher>,
    engine: SessionEngine,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let repo = Arc::new(StoryRepository::new(store.clone()));
    repo.load().await;

    let fetcher = Arc::new(
        StaticFetcher::new()
            .with_latency(Duration::from_millis(30))
            .with_fallback(placeholder_png(1, 2, 3).unwrap()),
    );
    let settings = EngineSettings::default();
    let cache = MediaCache::from_settings(fetcher.clone(), &settings);
    let engine = SessionEngine::new(repo.clone(), cache, settings);
    engine.set_viewer(VIEWER);

    Harness {
        store,
        repo,
        fetcher,
        engine,
    }
}

fn drain(events: &mut Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_mark_then_advance_completes_user() {
    let h = harness().await;
    // User index 0 is user id 1 with two stories.
    assert_eq!(h.repo.story_count(1), 2);

    h.engine.open(0, None).await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.current_user_index, 0);
    assert_eq!(snapshot.current_story_index, 0);

    h.engine.mark_current_as_viewed().await;
    assert!(h.repo.get_stories(1)[0].viewed_by.contains(&VIEWER));
    assert!(h.engine.has_unseen_stories(1));

    h.engine.advance_story().await;
    assert_eq!(h.engine.snapshot().await.current_story_index, 1);

    h.engine.mark_current_as_viewed().await;
    assert!(h.engine.has_viewed_all_stories(1));
    assert!(!h.engine.has_unseen_stories(1));
}

#[tokio::test(start_paused = true)]
async fn test_marking_twice_mutates_once() {
    let h = harness().await;
    let mut events = h.engine.subscribe();

    h.engine.open(0, None).await;
    h.engine.mark_current_as_viewed().await;
    h.engine.mark_current_as_viewed().await;

    let viewed_events = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::StoryViewed { .. }))
        .count();
    assert_eq!(viewed_events, 1);
    assert_eq!(h.repo.get_stories(1)[0].viewed_by.len(), 1);

    // A fresh session sees the story as already viewed and leaves it alone.
    h.engine.dismiss().await;
    h.engine.open(0, None).await;
    assert_eq!(h.engine.snapshot().await.current_story_index, 1);
    h.engine.retreat_story().await;
    h.engine.mark_current_as_viewed().await;
    assert!(drain(&mut events)
        .iter()
        .all(|event| !matches!(event, SessionEvent::StoryViewed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_reopen_without_marking_starts_at_same_story() {
    let h = harness().await;
    let user_id = 5;
    let mut story = h.repo.get_stories(user_id)[0].clone();
    story.viewed_by.insert(VIEWER);
    h.repo.update_story(story, user_id).await;

    h.engine.open(4, None).await;
    let first = h.engine.snapshot().await.current_story_index;
    assert_eq!(first, 1);
    h.engine.dismiss().await;

    h.engine.open(4, None).await;
    assert_eq!(h.engine.snapshot().await.current_story_index, first);
}

#[tokio::test(start_paused = true)]
async fn test_all_viewed_rewatches_from_start() {
    let h = harness().await;
    for mut story in h.repo.get_stories(3) {
        story.viewed_by.insert(VIEWER);
        h.repo.update_story(story, 3).await;
    }
    assert!(h.engine.has_viewed_all_stories(3));

    h.engine.open(2, None).await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.current_user_index, 2);
    assert_eq!(snapshot.current_story_index, 0);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_order_walk_schedules_dismissal() {
    let h = harness().await;
    let mut events = h.engine.subscribe();

    h.engine.open(2, Some(&[2, 5, 1, 9])).await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.viewing_order, vec![2, 5, 1, 9]);
    assert_eq!(snapshot.position_in_order, 0);

    for _ in 0..3 {
        h.engine.advance_user().await;
    }
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.position_in_order, 3);
    assert_eq!(snapshot.current_user_index, 9);
    assert_eq!(snapshot.current_story_index, 0);

    h.engine.advance_user().await;
    let snapshot = h.engine.snapshot().await;
    assert!(snapshot.dismiss_pending);
    assert_eq!(snapshot.status, PlaybackStatus::Dismissing);
    assert!(h.engine.is_presenting().await);

    time::sleep(Duration::from_millis(600)).await;
    assert!(!h.engine.is_presenting().await);

    let seen = drain(&mut events);
    assert!(seen
        .iter()
        .any(|event| matches!(event, SessionEvent::DismissScheduled)));
    assert!(seen.iter().any(|event| matches!(event, SessionEvent::Dismissed)));
}

#[tokio::test(start_paused = true)]
async fn test_start_user_outside_explicit_order_leads_it() {
    let h = harness().await;
    h.engine.open(3, Some(&[2, 5, 1])).await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.viewing_order, vec![3, 2, 5, 1]);
    assert_eq!(snapshot.current_user_index, 3);
    assert_eq!(snapshot.position_in_order, 0);

    h.engine.advance_user().await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.current_user_index, 2);
    assert_eq!(snapshot.position_in_order, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reopen_cancels_scheduled_dismissal() {
    let h = harness().await;
    h.engine.open(11, None).await;
    h.engine.advance_user().await;
    assert!(h.engine.snapshot().await.dismiss_pending);

    h.engine.open(0, None).await;
    time::sleep(Duration::from_millis(600)).await;
    assert!(h.engine.is_presenting().await);
    assert_eq!(h.engine.snapshot().await.current_user_index, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timer_waits_for_media_then_auto_advances() {
    let h = harness().await;
    h.engine.open(0, None).await;

    time::sleep(Duration::from_millis(1_000)).await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.status, PlaybackStatus::WaitingOnMedia);
    assert_eq!(snapshot.progress, 0.0);

    h.engine.media_loaded().await;
    time::sleep(Duration::from_millis(5_050)).await;

    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.current_story_index, 1);
    assert!(snapshot.is_waiting_on_media);
    assert_eq!(snapshot.progress, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_advance_replaces_timer() {
    let h = harness().await;
    h.engine.open(4, None).await;
    h.engine.media_loaded().await;

    time::sleep(Duration::from_millis(4_850)).await;
    let progress = h.engine.snapshot().await.progress;
    assert!(progress > 0.9 && progress < 1.0);

    h.engine.advance_story().await;
    h.engine.media_loaded().await;
    assert_eq!(h.engine.snapshot().await.progress, 0.0);

    // A stale ticker would push this story past its end.
    time::sleep(Duration::from_millis(4_850)).await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.current_story_index, 1);
    assert!(snapshot.progress > 0.9 && snapshot.progress < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_background_hold_progress() {
    let h = harness().await;
    h.engine.open(4, None).await;
    h.engine.media_loaded().await;

    h.engine.pause().await;
    time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(h.engine.snapshot().await.progress, 0.0);
    assert_eq!(h.engine.snapshot().await.status, PlaybackStatus::Paused);

    h.engine.resume().await;
    time::sleep(Duration::from_millis(1_050)).await;
    let progress = h.engine.snapshot().await.progress;
    assert!(progress > 0.15 && progress < 0.25);

    h.engine.enter_background().await;
    time::sleep(Duration::from_millis(3_000)).await;
    assert_eq!(h.engine.snapshot().await.progress, progress);

    h.engine.enter_foreground().await;
    assert_eq!(h.engine.snapshot().await.status, PlaybackStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_foreground_does_not_lift_explicit_hold() {
    let h = harness().await;
    h.engine.open(4, None).await;
    h.engine.media_loaded().await;

    h.engine.pause().await;
    h.engine.enter_background().await;
    h.engine.enter_foreground().await;
    assert_eq!(h.engine.snapshot().await.status, PlaybackStatus::Paused);

    time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(h.engine.snapshot().await.progress, 0.0);

    h.engine.resume().await;
    assert_eq!(h.engine.snapshot().await.status, PlaybackStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_background_while_idle_is_ignored() {
    let h = harness().await;
    let mut events = h.engine.subscribe();

    h.engine.enter_background().await;
    h.engine.enter_foreground().await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(h.engine.snapshot().await.status, PlaybackStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_releases_stuck_media() {
    let h = harness().await;
    h.engine.open(0, None).await;

    time::sleep(Duration::from_millis(10_050)).await;
    let snapshot = h.engine.snapshot().await;
    assert!(!snapshot.is_waiting_on_media);
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_reaction_toggle_and_last_write_wins() {
    let h = harness().await;
    h.engine.open(0, None).await;

    h.engine.toggle_reaction(ReactionKind::Heart).await;
    assert_eq!(h.repo.get_stories(1)[0].reaction, Some(ReactionKind::Heart));

    h.engine.toggle_reaction(ReactionKind::Heart).await;
    assert_eq!(h.repo.get_stories(1)[0].reaction, None);

    h.engine.toggle_reaction(ReactionKind::Fire).await;
    h.engine.toggle_reaction(ReactionKind::Laugh).await;
    assert_eq!(h.repo.get_stories(1)[0].reaction, Some(ReactionKind::Laugh));
}

#[tokio::test(start_paused = true)]
async fn test_send_reply_ignores_blank_text() {
    let h = harness().await;
    h.engine.open(0, None).await;

    h.engine.send_reply("").await;
    h.engine.send_reply("   ").await;
    assert!(h.repo.get_stories(1)[0].replies.is_empty());

    h.engine.send_reply("  love this  ").await;
    let replies = h.repo.get_stories(1)[0].replies.clone();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].text, "love this");
    assert_eq!(replies[0].author_id, VIEWER);
}

#[tokio::test(start_paused = true)]
async fn test_seen_state_survives_reload() {
    let h = harness().await;
    h.engine.open(0, None).await;
    h.engine.mark_current_as_viewed().await;
    // Let the detached persist run.
    time::sleep(Duration::from_millis(10)).await;

    let reloaded = StoryRepository::new(h.store.clone());
    let stories = reloaded.load().await;
    assert!(stories[&1][0].viewed_by.contains(&VIEWER));
}

#[tokio::test(start_paused = true)]
async fn test_seen_state_only_grows_across_later_writes() {
    let h = harness().await;
    h.engine.open(0, None).await;
    h.engine.mark_current_as_viewed().await;

    h.engine.toggle_reaction(ReactionKind::Heart).await;
    h.engine.send_reply("nice").await;
    h.engine.dismiss().await;

    h.engine.open(0, None).await;
    assert_eq!(h.engine.snapshot().await.current_story_index, 1);
    h.engine.retreat_story().await;
    h.engine.toggle_reaction(ReactionKind::Heart).await;
    h.engine.send_reply("again").await;
    assert!(h.repo.add_random_new_stories().await);
    time::sleep(Duration::from_millis(10)).await;

    let story = h.repo.get_stories(1)[0].clone();
    assert!(story.viewed_by.contains(&VIEWER));
    assert_eq!(story.reaction, None);
    assert_eq!(story.replies.len(), 2);

    let reloaded = StoryRepository::new(h.store.clone()).load().await;
    assert!(reloaded[&1][0].viewed_by.contains(&VIEWER));
    assert_eq!(reloaded[&1][0].replies.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_persist_failure_does_not_disturb_playback() {
    let h = harness().await;
    h.store.set_fail_writes(true);

    h.engine.open(0, None).await;
    h.engine.mark_current_as_viewed().await;
    time::sleep(Duration::from_millis(10)).await;

    assert!(h.repo.get_stories(1)[0].viewed_by.contains(&VIEWER));
    assert!(h.engine.is_presenting().await);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_input_is_ignored() {
    let h = harness().await;

    h.engine.open(99, None).await;
    assert_eq!(h.engine.snapshot().await.status, PlaybackStatus::Idle);

    h.engine.advance_story().await;
    h.engine.mark_current_as_viewed().await;
    h.engine.toggle_reaction(ReactionKind::Wow).await;
    assert_eq!(h.engine.current_media().await, MediaStatus::Unavailable);

    h.engine.open(0, None).await;
    h.engine.retreat_user().await;
    h.engine.retreat_story().await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.current_user_index, 0);
    assert_eq!(snapshot.current_story_index, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dismiss_is_idempotent_and_keeps_prefetches() {
    let h = harness().await;
    let mut events = h.engine.subscribe();

    h.engine.open(0, None).await;
    h.engine.dismiss().await;
    h.engine.dismiss().await;

    let dismissed = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::Dismissed))
        .count();
    assert_eq!(dismissed, 1);

    time::sleep(Duration::from_millis(100)).await;
    let first = h.repo.get_stories(1)[0].media_ref.clone();
    assert!(h.engine.cache().is_cached(&first));
    assert!(h.fetcher.request_count() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_current_media_resolves_from_cache() {
    let h = harness().await;
    h.engine.open(0, None).await;

    let first = h.repo.get_stories(1)[0].media_ref.clone();
    assert_eq!(
        h.engine.current_media().await,
        MediaStatus::Pending(first.clone())
    );

    time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(h.engine.current_media().await, MediaStatus::Ready(_)));
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_covers_next_user() {
    let h = harness().await;
    h.engine.open(0, None).await;
    time::sleep(Duration::from_millis(100)).await;

    let next_user_first = h.repo.get_stories(2)[0].media_ref.clone();
    if !next_user_first.starts_with("video://") {
        assert!(h.engine.cache().is_cached(&next_user_first));
    }
    assert!(h.engine.cache().cached_len() <= h.engine.cache().max_cached());
}
