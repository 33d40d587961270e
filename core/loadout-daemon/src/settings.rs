//! Settings persistence for the daemon host.
//!
//! The core treats settings as read-only and forwards writes to a sink;
//! this is that sink. Writes go through a temp file and rename so a crash
//! mid-write never leaves a truncated settings file behind.

use fs_err as fs;
use std::path::PathBuf;

use loadout_core::{Settings, SettingsSink};

pub struct FileSettingsSink {
    path: PathBuf,
}

impl FileSettingsSink {
    pub fn new(path: PathBuf) -> Self {
        FileSettingsSink { path }
    }
}

impl SettingsSink for FileSettingsSink {
    fn write(&self, settings: &Settings) -> Result<(), String> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| "settings path has no parent".to_string())?;
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed to create settings directory: {}", err))?;

        let serialized = serde_json::to_string_pretty(settings)
            .map_err(|err| format!("failed to serialize settings: {}", err))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)
            .map_err(|err| format!("failed to write settings: {}", err))?;
        fs::rename(&tmp, &self.path)
            .map_err(|err| format!("failed to move settings into place: {}", err))?;

        tracing::debug!(path = %self.path.display(), "Settings persisted");
        Ok(())
    }
}
