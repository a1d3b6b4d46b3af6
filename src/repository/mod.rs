pub mod seed;

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use rand::{seq::SliceRandom, Rng};
use tokio::sync::Mutex;

use crate::{
    models::{Story, StoryRecord, User},
    store::KeyValueStore,
};

const STORIES_KEY: &str = "stories.v1";

type StoryMap = BTreeMap<i64, Vec<Story>>;

/// Canonical per-user story lists, mirrored to a [`KeyValueStore`].
///
/// The in-memory map is authoritative for the running process; store failures
/// are logged and never reach the caller.
pub struct StoryRepository {
    store: Arc<dyn KeyValueStore>,
    users: Vec<User>,
    stories: RwLock<StoryMap>,
    /// Serializes snapshot+save so a later write never lands older state.
    write_lock: Mutex<()>,
}

impl StoryRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_roster(store, seed::default_roster())
    }

    pub fn with_roster(store: Arc<dyn KeyValueStore>, users: Vec<User>) -> Self {
        Self {
            store,
            users,
            stories: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn user_at(&self, index: usize) -> Option<&User> {
        self.users.get(index)
    }

    pub async fn load(&self) -> BTreeMap<i64, Vec<Story>> {
        match self.read_persisted().await {
            Ok(Some(map)) => {
                info!("Loaded stories for {} users from store", map.len());
                *self.write_map() = map.clone();
                return map;
            }
            Ok(None) => info!("No persisted stories; seeding defaults"),
            Err(err) => warn!("Persisted stories unreadable, regenerating: {err:#}"),
        }

        let seeded = seed::generate(&self.users, Utc::now());
        *self.write_map() = seeded.clone();
        self.persist().await;
        seeded
    }

    pub fn get_stories(&self, user_id: i64) -> Vec<Story> {
        self.read_map().get(&user_id).cloned().unwrap_or_default()
    }

    pub fn story_count(&self, user_id: i64) -> usize {
        self.read_map().get(&user_id).map_or(0, Vec::len)
    }

    pub fn story_at(&self, user_id: i64, index: usize) -> Option<Story> {
        self.read_map()
            .get(&user_id)
            .and_then(|stories| stories.get(index))
            .cloned()
    }

    /// Runs `f` against the user's list without cloning it.
    pub fn with_stories<R>(&self, user_id: i64, f: impl FnOnce(&[Story]) -> R) -> R {
        let map = self.read_map();
        let stories = map.get(&user_id).map_or(&[][..], Vec::as_slice);
        f(stories)
    }

    pub async fn add_story(&self, story: Story, user_id: i64) {
        self.write_map()
            .entry(user_id)
            .or_default()
            .insert(0, story);
        self.persist().await;
    }

    pub async fn update_story(&self, story: Story, user_id: i64) {
        if self.apply_update(story, user_id) {
            self.persist().await;
        }
    }

    /// Applies the update in memory now and persists in the background.
    pub fn update_story_detached(self: &Arc<Self>, story: Story, user_id: i64) -> bool {
        if !self.apply_update(story, user_id) {
            return false;
        }
        let repo = Arc::clone(self);
        tokio::spawn(async move { repo.persist().await });
        true
    }

    pub async fn add_random_new_stories(&self) -> bool {
        let added = {
            let mut map = self.write_map();
            if map.is_empty() {
                return false;
            }

            let mut rng = rand::thread_rng();
            let known: Vec<i64> = map.keys().copied().collect();
            let pick = rng.gen_range(1..=3).min(known.len());
            let chosen: Vec<i64> = known.choose_multiple(&mut rng, pick).copied().collect();

            let now = Utc::now();
            for user_id in &chosen {
                let stories = map.entry(*user_id).or_default();
                let created_at = match stories.iter().map(|story| story.created_at).max() {
                    Some(newest) if newest >= now => newest + Duration::seconds(1),
                    _ => now,
                };
                let story = seed::synthetic_story(*user_id, stories.len(), created_at);
                stories.push(story);
            }
            chosen
        };

        info!("Refresh added new stories for users {added:?}");
        self.persist().await;
        true
    }

    pub async fn reset_to_defaults(&self) {
        {
            let _guard = self.write_lock.lock().await;
            if let Err(err) = self.store.remove(STORIES_KEY).await {
                warn!("Failed to wipe persisted stories: {err:#}");
            }
        }
        let seeded = seed::generate(&self.users, Utc::now());
        *self.write_map() = seeded;
        self.persist().await;
        info!("Story repository reset to defaults");
    }

    fn apply_update(&self, story: Story, user_id: i64) -> bool {
        let mut map = self.write_map();
        let Some(stories) = map.get_mut(&user_id) else {
            debug!("update_story: unknown user {user_id}");
            return false;
        };
        match stories.iter_mut().find(|existing| existing.id == story.id) {
            Some(existing) => {
                *existing = story;
                true
            }
            None => {
                debug!("update_story: story {} not found for user {user_id}", story.id);
                false
            }
        }
    }

    async fn read_persisted(&self) -> Result<Option<StoryMap>> {
        let Some(bytes) = self.store.load(STORIES_KEY).await? else {
            return Ok(None);
        };
        let records: BTreeMap<i64, Vec<StoryRecord>> =
            serde_json::from_slice(&bytes).context("failed to decode persisted stories")?;
        let map = records
            .into_iter()
            .map(|(user_id, records)| (user_id, records.into_iter().map(Story::from).collect()))
            .collect();
        Ok(Some(map))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let map = self.read_map();
        let records: BTreeMap<i64, Vec<StoryRecord>> = map
            .iter()
            .map(|(user_id, stories)| (*user_id, stories.iter().map(StoryRecord::from).collect()))
            .collect();
        serde_json::to_vec(&records).context("failed to encode stories")
    }

    async fn persist(&self) {
        let _guard = self.write_lock.lock().await;
        let bytes = match self.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Skipping story persist: {err:#}");
                return;
            }
        };
        if let Err(err) = self.store.save(STORIES_KEY, bytes).await {
            warn!("Story persist failed, keeping in-memory state: {err:#}");
        }
    }

    fn read_map(&self) -> RwLockReadGuard<'_, StoryMap> {
        match self.stories.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, StoryMap> {
        match self.stories.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
