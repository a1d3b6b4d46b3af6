use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub max_cached_images: usize,
    pub max_concurrent_loads: usize,
    pub tick_interval_ms: u64,
    pub progress_increment: f64,
    pub dismiss_delay_ms: u64,
    /// Ceiling on how long a stuck media load may hold back auto-advance.
    pub media_watchdog_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_cached_images: 40,
            max_concurrent_loads: 8,
            tick_interval_ms: 100,
            progress_increment: 0.02,
            dismiss_delay_ms: 500,
            media_watchdog_ms: 10_000,
        }
    }
}

impl EngineSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn dismiss_delay(&self) -> Duration {
        Duration::from_millis(self.dismiss_delay_ms)
    }

    /// Number of ticks the waiting-on-media flag may block progress.
    pub fn media_watchdog_ticks(&self) -> u32 {
        let ticks = self.media_watchdog_ms / self.tick_interval_ms.max(1);
        ticks.clamp(1, u64::from(u32::MAX)) as u32
    }

    /// Applies `STORYREEL_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_u64("STORYREEL_TICK_MS") {
            self.tick_interval_ms = value;
        }
        if let Some(value) = env_u64("STORYREEL_MAX_CACHED") {
            self.max_cached_images = value as usize;
        }
        if let Some(value) = env_u64("STORYREEL_MAX_CONCURRENT") {
            self.max_concurrent_loads = value as usize;
        }
        if let Some(value) = env_u64("STORYREEL_MEDIA_WATCHDOG_MS") {
            self.media_watchdog_ms = value;
        }
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("Ignoring {name}={raw}: {err}");
            None
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    engine: EngineSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Settings at {} are unreadable ({err}); using defaults",
                    path.display()
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn engine(&self) -> EngineSettings {
        self.read().engine.clone()
    }

    pub fn update_engine(&self, settings: EngineSettings) -> Result<()> {
        let mut guard = self.write();
        guard.engine = settings;
        self.persist(&guard)
    }

    /// Re-reads the file after an external edit. A bad file leaves the
    /// current values in place.
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: UserSettings =
            serde_json::from_str(&contents).context("Settings file is not valid JSON")?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
