use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::session::{
    state::{DEFAULT_LOG_CAPACITY, DEFAULT_LOG_TRIM_TO},
    ControllerConfig, TimerChoice, DEFAULT_ACTIVITY_INTERVAL,
};

pub const CONFIG_ENV_VAR: &str = "KEEP_AWAKE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Log the shutdown instead of running it.
    pub dry_run: bool,
    pub command: Vec<String>,
    /// `None` means the platform cannot abort an issued shutdown.
    pub abort_command: Option<Vec<String>>,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            dry_run: true,
            command: Vec::new(),
            abort_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub activity_interval_secs: u64,
    pub default_timer: TimerChoice,
    pub status_tail: usize,
    pub log_capacity: usize,
    pub log_trim_to: usize,
    pub shutdown: ShutdownSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            activity_interval_secs: DEFAULT_ACTIVITY_INTERVAL.as_secs(),
            default_timer: TimerChoice::Never,
            status_tail: 5,
            log_capacity: DEFAULT_LOG_CAPACITY,
            log_trim_to: DEFAULT_LOG_TRIM_TO,
            shutdown: ShutdownSettings::default(),
        }
    }
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            activity_interval: Duration::from_secs(self.activity_interval_secs.max(1)),
            log_capacity: self.log_capacity,
            log_trim_to: self.log_trim_to,
        }
    }
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings in {}: {err}", path.display());
                Settings::default()
            })
        } else {
            Settings::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Defaults only; nothing is ever written.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(Settings::default()),
        }
    }

    /// Use `path` if given, else the `KEEP_AWAKE_CONFIG` variable, else
    /// in-memory defaults.
    pub fn locate(path: Option<PathBuf>) -> Result<Self> {
        match path.or_else(|| env::var_os(CONFIG_ENV_VAR).map(PathBuf::from)) {
            Some(path) => Self::new(path),
            None => Ok(Self::in_memory()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn settings(&self) -> Settings {
        self.read().clone()
    }

    pub fn update_default_timer(&self, choice: TimerChoice) -> Result<()> {
        let mut guard = self.write();
        guard.default_timer = choice;
        self.persist(&guard)
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        let Some(path) = &self.path else {
            bail!("no settings file configured (use --config or {CONFIG_ENV_VAR})");
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, Settings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Settings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
