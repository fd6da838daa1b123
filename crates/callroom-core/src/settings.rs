use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::TeardownTimeouts;

const SETTINGS_FILE: &str = "call_settings.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CallSettings {
    #[serde(default = "default_true")]
    pub ring_on_create: bool,
    #[serde(default = "default_device_disable_timeout_ms")]
    pub device_disable_timeout_ms: u64,
    #[serde(default = "default_end_call_timeout_ms")]
    pub end_call_timeout_ms: u64,
    #[serde(default = "default_display_name")]
    pub default_display_name: String,
    /// Custom outgoing ring tone bundled with the app, e.g. `ringing.mp3`.
    #[serde(default)]
    pub outgoing_ring_tone: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_device_disable_timeout_ms() -> u64 {
    5_000
}

fn default_end_call_timeout_ms() -> u64 {
    10_000
}

fn default_display_name() -> String {
    "User".to_string()
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            ring_on_create: true,
            device_disable_timeout_ms: default_device_disable_timeout_ms(),
            end_call_timeout_ms: default_end_call_timeout_ms(),
            default_display_name: default_display_name(),
            outgoing_ring_tone: None,
        }
    }
}

impl CallSettings {
    pub fn teardown_timeouts(&self) -> TeardownTimeouts {
        TeardownTimeouts {
            device_disable: Duration::from_millis(self.device_disable_timeout_ms),
            end_call: Duration::from_millis(self.end_call_timeout_ms),
        }
    }
}

/// Call settings persisted as JSON in the app's data directory.
pub struct SettingsStore {
    settings: Mutex<CallSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join(SETTINGS_FILE);
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> CallSettings {
        self.lock().clone()
    }

    pub fn set_ring_on_create(&self, ring: bool) {
        self.lock().ring_on_create = ring;
        self.save();
    }

    pub fn set_device_disable_timeout_ms(&self, ms: u64) {
        self.lock().device_disable_timeout_ms = ms;
        self.save();
    }

    pub fn set_end_call_timeout_ms(&self, ms: u64) {
        self.lock().end_call_timeout_ms = ms;
        self.save();
    }

    pub fn set_outgoing_ring_tone(&self, tone: Option<String>) {
        self.lock().outgoing_ring_tone = tone;
        self.save();
    }

    fn lock(&self) -> MutexGuard<'_, CallSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("failed to write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("failed to serialize call settings: {e}"),
        }
    }

    fn load(path: &Path) -> CallSettings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable {}: {e}", path.display());
                CallSettings::default()
            }),
            Err(_) => CallSettings::default(),
        }
    }
}
