pub mod cache;
pub mod db;
pub mod models;
pub mod repository;
pub mod session;
pub mod settings;
pub mod store;
pub mod utils;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{debug, error, info};
use tokio::{sync::broadcast::error::RecvError, time};

use cache::{placeholder_png, MediaCache, MediaFetcher, StaticFetcher};
use db::Database;
use models::ReactionKind;
use repository::StoryRepository;
use session::{MediaStatus, PlaybackStatus, SessionEngine, SessionEvent};
use settings::{EngineSettings, SettingsStore};
use store::KeyValueStore;

pub use utils::logging::init_logging;

/// Identity handed to the engine by the demo runner.
const DEMO_VIEWER_ID: i64 = 1000;

/// Explicitly wired services; the host app owns one of these.
pub struct AppState {
    pub repo: Arc<StoryRepository>,
    pub cache: MediaCache,
    pub engine: SessionEngine,
}

impl AppState {
    /// Builds the services and loads (or seeds) the story repository.
    pub async fn new(
        store: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn MediaFetcher>,
        settings: EngineSettings,
    ) -> Self {
        let repo = Arc::new(StoryRepository::new(store));
        repo.load().await;
        let cache = MediaCache::from_settings(fetcher, &settings);
        let engine = SessionEngine::new(Arc::clone(&repo), cache.clone(), settings);
        Self {
            repo,
            cache,
            engine,
        }
    }
}

/// Headless entry point: plays one session over the first three users
/// against an on-disk store.
pub fn run() {
    init_logging();
    info!("storyreel starting up...");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start tokio runtime: {err}");
            return;
        }
    };

    if let Err(err) = runtime.block_on(run_demo()) {
        error!("Demo session failed: {err:#}");
    }
}

async fn run_demo() -> Result<()> {
    let data_dir = std::env::var_os("STORYREEL_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("storyreel"));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let settings = settings_store.engine().with_env_overrides();
    let database = Database::new(data_dir.join("storyreel.sqlite3"))?;
    let fetcher = StaticFetcher::new()
        .with_latency(Duration::from_millis(150))
        .with_fallback(placeholder_png(236, 72, 153)?);

    let app = AppState::new(Arc::new(database), Arc::new(fetcher), settings).await;
    let engine = &app.engine;
    engine.set_viewer(DEMO_VIEWER_ID);

    let mut events = engine.subscribe();
    engine.open(0, Some(&[0, 1, 2])).await;

    let mut last_position = None;
    let mut reacted = false;
    loop {
        match time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(SessionEvent::Dismissed)) | Ok(Err(RecvError::Closed)) => break,
            Ok(Ok(SessionEvent::ReactionChanged {
                reaction: Some(kind),
                ..
            })) => info!("Reacted {} to the opening story", kind.emoji()),
            Ok(Err(RecvError::Lagged(skipped))) => debug!("Demo skipped {skipped} events"),
            Ok(Ok(_)) | Err(_) => {}
        }

        let snapshot = engine.snapshot().await;
        if snapshot.status == PlaybackStatus::Idle {
            break;
        }

        let position = (snapshot.current_user_index, snapshot.current_story_index);
        if last_position != Some(position) {
            last_position = Some(position);
            info!(
                "Now showing user index {} story {}",
                position.0, position.1
            );
        }

        if snapshot.is_waiting_on_media {
            match engine.current_media().await {
                MediaStatus::Ready(_) | MediaStatus::Video(_) => {
                    engine.media_loaded().await;
                    engine.mark_current_as_viewed().await;
                    if !reacted {
                        reacted = true;
                        engine.toggle_reaction(ReactionKind::Fire).await;
                    }
                }
                MediaStatus::Pending(_) | MediaStatus::Unavailable => {}
            }
        }
    }

    for user in app.repo.users().iter().take(3) {
        info!(
            "{}: viewed all = {}",
            user.display_name,
            engine.has_viewed_all_stories(user.id)
        );
    }

    if app.repo.add_random_new_stories().await {
        let unseen: Vec<&str> = app
            .repo
            .users()
            .iter()
            .filter(|user| engine.has_unseen_stories(user.id))
            .map(|user| user.display_name.as_str())
            .collect();
        info!("After refresh, users with unseen stories: {unseen:?}");
    }

    Ok(())
}
