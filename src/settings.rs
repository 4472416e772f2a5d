use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use crate::models::{phase::NOMINAL_BREAK_MINUTES, Phase, NOMINAL_WORK_MINUTES};

pub const DATA_DIR_ENV: &str = "TOMATO_DATA_DIR";
pub const DEBUG_ENV: &str = "TOMATO_DEBUG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub chime_enabled: bool,
    pub chime_volume: f32,
    pub timeout_ms: u32,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            chime_enabled: true,
            chime_volume: 0.6,
            timeout_ms: 10_000,
        }
    }
}

/// Phase lengths offered to the UI. Shortening them is a development
/// convenience; stats still credit the nominal 25 minutes per work session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseDurations {
    pub work_minutes: u64,
    pub break_minutes: u64,
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            work_minutes: NOMINAL_WORK_MINUTES,
            break_minutes: NOMINAL_BREAK_MINUTES,
        }
    }
}

impl PhaseDurations {
    pub fn seconds(&self, phase: Phase) -> u64 {
        let minutes = match phase {
            Phase::Work => self.work_minutes,
            Phase::Break => self.break_minutes,
        };
        minutes.max(1) * 60
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub durations: PhaseDurations,
    pub notifications: NotificationSettings,
    pub poll_interval_secs: u64,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            durations: PhaseDurations::default(),
            notifications: NotificationSettings::default(),
            poll_interval_secs: 30,
        }
    }
}

impl UserSettings {
    /// How often the wake slot is re-checked against the wall clock.
    /// `TOMATO_DEBUG=1` drops it to one second.
    pub fn poll_interval(&self) -> Duration {
        if debug_mode() {
            return Duration::from_secs(1);
        }
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

pub fn debug_mode() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// `$TOMATO_DATA_DIR`, else the platform data directory.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::data_dir()
        .map(|dir| dir.join("tomato-timer"))
        .context("could not determine a data directory; set TOMATO_DATA_DIR")
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
                warn!("Ignoring malformed settings in {}: {err}", path.display());
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

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> UserSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: UserSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.current(), UserSettings::default());
        assert_eq!(store.current().durations.seconds(Phase::Work), 1500);
        assert_eq!(store.current().durations.seconds(Phase::Break), 300);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"durations":{"work_minutes":1}}"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().current();
        assert_eq!(settings.durations.work_minutes, 1);
        assert_eq!(settings.durations.break_minutes, 5);
        assert!(settings.notifications.enabled);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(SettingsStore::new(path).unwrap().current(), UserSettings::default());
    }

    #[test]
    fn update_persists_to_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.current();
        settings.notifications.chime_enabled = false;
        store.update(settings.clone()).unwrap();

        assert_eq!(SettingsStore::new(path).unwrap().current(), settings);
    }
}
