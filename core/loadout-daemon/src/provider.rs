//! File-backed build data source.
//!
//! The companion's data pipeline drops per-champion recommendation files
//! under `~/.loadout/builds-source/<mode>/<champion>.json`, plus a
//! `current_patch` marker at the root. The daemon treats that directory as
//! the provider: a resolve reads and validates the matching file.

use fs_err as fs;
use std::path::PathBuf;

use loadout_core::BuildProvider;
use loadout_protocol::{BuildKey, BuildResult};

pub struct FileProvider {
    root: PathBuf,
}

impl FileProvider {
    pub fn new(root: PathBuf) -> Self {
        FileProvider { root }
    }

    /// Patch marker maintained by the data pipeline. Absent until the
    /// first pipeline run.
    pub fn current_patch(&self) -> Option<String> {
        let marker = self.root.join("current_patch");
        let contents = fs::read_to_string(marker).ok()?;
        let patch = contents.trim();
        if patch.is_empty() {
            None
        } else {
            Some(patch.to_string())
        }
    }

    fn build_path(&self, key: &BuildKey) -> PathBuf {
        self.root
            .join(&key.game_mode_id)
            .join(format!("{}.json", key.champion_id))
    }
}

impl BuildProvider for FileProvider {
    fn compute(&self, key: &BuildKey) -> Result<BuildResult, String> {
        let path = self.build_path(key);
        let contents = fs::read_to_string(&path)
            .map_err(|err| format!("no build data for {}: {}", key.champion_id, err))?;
        let build: BuildResult = serde_json::from_str(&contents)
            .map_err(|err| format!("build data for {} is malformed: {}", key.champion_id, err))?;
        if build.item_ids.is_empty() {
            return Err(format!("build data for {} has no items", key.champion_id));
        }
        Ok(build)
    }
}
