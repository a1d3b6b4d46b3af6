use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use log::{debug, info, warn};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{
    cache::{Blob, MediaCache},
    models::{MediaRef, ReactionKind, Reply, Story},
    repository::StoryRepository,
    settings::EngineSettings,
};

use super::{
    events::SessionEvent,
    planner,
    prefetch::plan_windows,
    state::{SessionSnapshot, SessionState, Step, TickOutcome},
};

const EVENT_CAPACITY: usize = 256;

/// What the renderer can show for the current story right now.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaStatus {
    Ready(Blob),
    /// Remote image not cached yet.
    Pending(String),
    /// Video reference; streamed by the player, never prefetched.
    Video(String),
    Unavailable,
}

struct EngineState {
    session: SessionState,
    ticker: Option<JoinHandle<()>>,
    dismiss_task: Option<JoinHandle<()>>,
}

struct EngineInner {
    state: Mutex<EngineState>,
    repo: Arc<StoryRepository>,
    cache: MediaCache,
    settings: EngineSettings,
    viewer_id: AtomicI64,
    events: broadcast::Sender<SessionEvent>,
}

/// Story playback state machine.
///
/// Every operation serializes through one async mutex. Invalid input is
/// logged and ignored; nothing here returns an error to the caller.
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<EngineInner>,
}

impl SessionEngine {
    pub fn new(repo: Arc<StoryRepository>, cache: MediaCache, settings: EngineSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState {
                    session: SessionState::new(),
                    ticker: None,
                    dismiss_task: None,
                }),
                repo,
                cache,
                settings,
                viewer_id: AtomicI64::new(0),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn set_viewer(&self, viewer_id: i64) {
        self.inner.viewer_id.store(viewer_id, Ordering::SeqCst);
    }

    pub fn viewer_id(&self) -> i64 {
        self.inner.viewer_id()
    }

    pub fn cache(&self) -> &MediaCache {
        &self.inner.cache
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.lock().await.session.snapshot()
    }

    pub async fn is_presenting(&self) -> bool {
        self.inner.state.lock().await.session.presenting
    }

    pub async fn open(&self, user_index: usize, explicit_order: Option<&[usize]>) {
        let inner = &self.inner;
        let Some(user_id) = inner.repo.user_at(user_index).map(|user| user.id) else {
            warn!(
                "open ignored: user index {user_index} out of range ({} users)",
                inner.repo.users().len()
            );
            return;
        };
        if inner.repo.story_count(user_id) == 0 {
            warn!("open ignored: user {user_id} has no stories");
            return;
        }

        let viewer = inner.viewer_id();
        let start_story = inner.repo.with_stories(user_id, |stories| {
            stories
                .iter()
                .position(|story| !story.is_viewed_by(viewer))
                .unwrap_or(0)
        });
        let plan = planner::plan(user_index, explicit_order, inner.repo.users().len());

        let mut guard = inner.state.lock().await;
        let engine = &mut *guard;
        if let Some(pending) = engine.dismiss_task.take() {
            pending.abort();
        }
        engine.session.begin(plan, user_index, start_story);
        inner.restart_ticker(engine);
        inner.prefetch(&engine.session);
        inner.emit_state(&engine.session);

        info!(
            "Opened stories of user {user_id} at story {start_story} (order {:?})",
            engine.session.viewing_order
        );
    }

    pub async fn advance_story(&self) {
        self.navigate(SessionState::advance_story).await;
    }

    pub async fn retreat_story(&self) {
        self.navigate(SessionState::retreat_story).await;
    }

    pub async fn advance_user(&self) {
        self.navigate(SessionState::advance_user).await;
    }

    pub async fn retreat_user(&self) {
        self.navigate(SessionState::retreat_user).await;
    }

    pub async fn dismiss(&self) {
        self.inner.dismiss(true).await;
    }

    pub async fn mark_current_as_viewed(&self) {
        let inner = &self.inner;
        let viewer = inner.viewer_id();
        let mut guard = inner.state.lock().await;

        let Some((user_id, mut story)) = inner.current_story(&guard.session) else {
            debug!("mark_current_as_viewed: no current story");
            return;
        };
        if guard.session.marked_this_session.contains(&story.id) || story.is_viewed_by(viewer) {
            return;
        }

        guard.session.marked_this_session.insert(story.id);
        story.mark_viewed_by(viewer);
        let story_id = story.id;
        inner.repo.update_story_detached(story, user_id);
        inner.emit(SessionEvent::StoryViewed { user_id, story_id });
    }

    pub fn has_unseen_stories(&self, user_id: i64) -> bool {
        let viewer = self.inner.viewer_id();
        self.inner.repo.with_stories(user_id, |stories| {
            stories.iter().any(|story| !story.is_viewed_by(viewer))
        })
    }

    /// True for users without stories as well.
    pub fn has_viewed_all_stories(&self, user_id: i64) -> bool {
        !self.has_unseen_stories(user_id)
    }

    pub async fn toggle_reaction(&self, kind: ReactionKind) {
        let inner = &self.inner;
        let guard = inner.state.lock().await;
        let Some((user_id, mut story)) = inner.current_story(&guard.session) else {
            debug!("toggle_reaction: no current story");
            return;
        };

        story.reaction = if story.reaction == Some(kind) {
            None
        } else {
            Some(kind)
        };
        let (story_id, reaction) = (story.id, story.reaction);
        inner.repo.update_story_detached(story, user_id);
        inner.emit(SessionEvent::ReactionChanged { story_id, reaction });
    }

    pub async fn send_reply(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let inner = &self.inner;
        let guard = inner.state.lock().await;
        let Some((user_id, mut story)) = inner.current_story(&guard.session) else {
            debug!("send_reply: no current story");
            return;
        };

        let reply = Reply::new(inner.viewer_id(), text.to_string());
        let reply_id = reply.id;
        story.replies.push(reply);
        let story_id = story.id;
        inner.repo.update_story_detached(story, user_id);
        inner.emit(SessionEvent::ReplySent { story_id, reply_id });
    }

    pub async fn pause(&self) {
        self.update_playback(SessionState::pause).await;
    }

    pub async fn resume(&self) {
        self.update_playback(SessionState::resume).await;
    }

    pub async fn enter_background(&self) {
        self.update_playback(SessionState::enter_background).await;
    }

    /// Resumes only if backgrounding was what paused playback.
    pub async fn enter_foreground(&self) {
        self.update_playback(SessionState::enter_foreground).await;
    }

    /// The embedding layer reports the current story's media is on screen.
    pub async fn media_loaded(&self) {
        let mut guard = self.inner.state.lock().await;
        if guard.session.media_ready() {
            self.inner.emit_state(&guard.session);
        }
    }

    pub async fn current_story(&self) -> Option<Story> {
        let guard = self.inner.state.lock().await;
        self.inner
            .current_story(&guard.session)
            .map(|(_, story)| story)
    }

    pub async fn current_media(&self) -> MediaStatus {
        let Some(story) = self.current_story().await else {
            return MediaStatus::Unavailable;
        };

        match MediaRef::parse(&story.media_ref) {
            MediaRef::Remote(url) => match self.inner.cache.get_cached(url) {
                Some(blob) => MediaStatus::Ready(blob),
                None => MediaStatus::Pending(url.to_string()),
            },
            MediaRef::Video(url) => MediaStatus::Video(url.to_string()),
            inline @ MediaRef::Inline(_) => match inline.decode_inline() {
                Ok(bytes) => MediaStatus::Ready(Arc::new(bytes)),
                Err(err) => {
                    warn!("Story {} has an undecodable inline payload: {err:#}", story.id);
                    MediaStatus::Unavailable
                }
            },
        }
    }

    async fn navigate(&self, op: impl FnOnce(&mut SessionState, &dyn Fn(usize) -> usize) -> Step) {
        let inner = &self.inner;
        let mut guard = inner.state.lock().await;
        let engine = &mut *guard;
        if !engine.session.presenting {
            debug!("navigation ignored: no session open");
            return;
        }
        let step = op(&mut engine.session, &|index| inner.story_count_at(index));
        inner.apply_step(engine, step);
    }

    async fn update_playback(&self, op: impl FnOnce(&mut SessionState) -> bool) {
        let mut guard = self.inner.state.lock().await;
        if op(&mut guard.session) {
            self.inner.emit_state(&guard.session);
        }
    }
}

impl EngineInner {
    fn viewer_id(&self) -> i64 {
        self.viewer_id.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_state(&self, session: &SessionState) {
        self.emit(SessionEvent::StateChanged {
            snapshot: session.snapshot(),
        });
    }

    fn story_count_at(&self, user_index: usize) -> usize {
        self.repo
            .user_at(user_index)
            .map_or(0, |user| self.repo.story_count(user.id))
    }

    fn media_refs_at(&self, user_index: usize) -> Vec<String> {
        match self.repo.user_at(user_index) {
            Some(user) => self.repo.with_stories(user.id, |stories| {
                stories.iter().map(|story| story.media_ref.clone()).collect()
            }),
            None => Vec::new(),
        }
    }

    fn current_story(&self, session: &SessionState) -> Option<(i64, Story)> {
        if !session.presenting {
            return None;
        }
        let user_id = self.repo.user_at(session.current_user_index)?.id;
        let story = self.repo.story_at(user_id, session.current_story_index)?;
        Some((user_id, story))
    }

    fn prefetch(&self, session: &SessionState) {
        let batch = plan_windows(session, &|index| self.media_refs_at(index));
        self.cache.request_batch(&batch);
    }

    fn apply_step(self: &Arc<Self>, engine: &mut EngineState, step: Step) {
        match step {
            Step::Moved => {
                self.restart_ticker(engine);
                self.prefetch(&engine.session);
                self.emit_state(&engine.session);
            }
            Step::Finished => {
                self.stop_ticker(engine);
                self.schedule_dismiss(engine);
                self.emit(SessionEvent::DismissScheduled);
                self.emit_state(&engine.session);
            }
            Step::Unchanged => debug!("navigation step had no effect"),
        }
    }

    /// Cancel-and-replace: the previous ticker is aborted and its generation retired.
    fn restart_ticker(self: &Arc<Self>, engine: &mut EngineState) {
        let generation = engine.session.next_generation();
        if let Some(previous) = engine.ticker.take() {
            previous.abort();
        }
        engine.ticker = Some(tokio::spawn(run_ticker(
            Arc::downgrade(self),
            generation,
            self.settings.tick_interval(),
        )));
    }

    fn stop_ticker(&self, engine: &mut EngineState) {
        engine.session.next_generation();
        if let Some(previous) = engine.ticker.take() {
            previous.abort();
        }
    }

    fn schedule_dismiss(self: &Arc<Self>, engine: &mut EngineState) {
        if let Some(previous) = engine.dismiss_task.take() {
            previous.abort();
        }
        let weak = Arc::downgrade(self);
        let delay = self.settings.dismiss_delay();
        engine.dismiss_task = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.dismiss(false).await;
            }
        }));
    }

    /// `abort_pending` is false when called from the scheduled dismissal itself.
    async fn dismiss(&self, abort_pending: bool) {
        let mut guard = self.state.lock().await;
        let engine = &mut *guard;

        self.stop_ticker(engine);
        if let Some(pending) = engine.dismiss_task.take() {
            if abort_pending {
                pending.abort();
            }
        }

        let was_active = engine.session.presenting;
        engine.session.end();
        if was_active {
            info!("Story session dismissed");
            self.emit(SessionEvent::Dismissed);
            self.emit_state(&engine.session);
        }
    }

    /// Returns whether the ticker should keep running.
    async fn on_tick(self: &Arc<Self>, generation: u64) -> bool {
        let mut guard = self.state.lock().await;
        let engine = &mut *guard;
        if engine.session.ticker_generation != generation {
            return false;
        }

        let outcome = engine.session.tick(
            self.settings.progress_increment,
            self.settings.media_watchdog_ticks(),
        );
        match outcome {
            TickOutcome::Idle => true,
            TickOutcome::Progressed => {
                self.emit_state(&engine.session);
                true
            }
            TickOutcome::WatchdogCleared => {
                warn!(
                    "Media for user index {} story {} not ready after {}ms; resuming playback",
                    engine.session.current_user_index,
                    engine.session.current_story_index,
                    self.settings.media_watchdog_ms
                );
                self.emit_state(&engine.session);
                true
            }
            TickOutcome::Completed => {
                let step = engine
                    .session
                    .advance_story(&|index| self.story_count_at(index));
                self.apply_step(engine, step);
                false
            }
        }
    }
}

async fn run_ticker(engine: Weak<EngineInner>, generation: u64, period: Duration) {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(inner) = engine.upgrade() else {
            break;
        };
        if !inner.on_tick(generation).await {
            break;
        }
    }
}
