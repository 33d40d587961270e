//! SQLite persistence for computed builds.
//!
//! The store is the only component that touches durable storage. Rows are
//! keyed by the full composite (mode, champion, patch) key; entries whose
//! patch differs from the caller's current patch are evicted on read and
//! reported as a miss. Persistence failures flip the store into a
//! miss-only degraded mode instead of crashing the process: reads report
//! Miss, writes fail loudly, until a health probe succeeds again.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use loadout_protocol::{BuildKey, BuildResult};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: BuildKey,
    pub payload: BuildResult,
    pub computed_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss,
}

pub struct BuildStore {
    path: PathBuf,
    degraded: AtomicBool,
}

impl BuildStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let store = Self {
            path,
            degraded: AtomicBool::new(false),
        };
        store.init_schema().map_err(CoreError::CacheUnavailable)?;
        Ok(store)
    }

    /// Looks up one entry. The key's `patch_version` is the caller's
    /// current patch: rows for the same (mode, champion) under any other
    /// patch are deleted here and never returned.
    pub fn get(&self, key: &BuildKey) -> Result<CacheLookup> {
        if self.is_degraded() {
            tracing::debug!(champion_id = %key.champion_id, "Store degraded; reporting miss");
            return Ok(CacheLookup::Miss);
        }

        let key = key.clone();
        self.guard(self.with_connection(move |conn| {
            let evicted = conn
                .execute(
                    "DELETE FROM builds \
                     WHERE game_mode_id = ?1 AND champion_id = ?2 AND patch_version != ?3",
                    params![key.game_mode_id, key.champion_id, key.patch_version],
                )
                .map_err(|err| format!("Failed to evict stale builds: {}", err))?;
            if evicted > 0 {
                tracing::info!(
                    game_mode_id = %key.game_mode_id,
                    champion_id = %key.champion_id,
                    evicted,
                    "Evicted patch-expired builds on read"
                );
            }

            let row = conn
                .query_row(
                    "SELECT payload, computed_at FROM builds \
                     WHERE game_mode_id = ?1 AND champion_id = ?2 AND patch_version = ?3",
                    params![key.game_mode_id, key.champion_id, key.patch_version],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(|err| format!("Failed to query build: {}", err))?;

            match row {
                Some((payload, computed_at)) => {
                    let payload: BuildResult = serde_json::from_str(&payload)
                        .map_err(|err| format!("Failed to parse build payload: {}", err))?;
                    Ok(CacheLookup::Hit(CacheEntry {
                        key,
                        payload,
                        computed_at,
                    }))
                }
                None => Ok(CacheLookup::Miss),
            }
        }))
    }

    /// Upserts one entry; replacing an existing key also replaces its
    /// `computed_at`.
    pub fn put(&self, key: &BuildKey, payload: &BuildResult) -> Result<()> {
        if self.is_degraded() {
            return Err(CoreError::CacheUnavailable(
                "store is degraded; write rejected".to_string(),
            ));
        }

        let key = key.clone();
        let serialized = serde_json::to_string(payload)
            .map_err(|err| CoreError::CacheUnavailable(format!("serialize build: {}", err)))?;
        let computed_at = Utc::now().to_rfc3339();

        self.guard(self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO builds \
                    (game_mode_id, champion_id, patch_version, payload, computed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(game_mode_id, champion_id, patch_version) DO UPDATE SET \
                    payload = excluded.payload, \
                    computed_at = excluded.computed_at",
                params![
                    key.game_mode_id,
                    key.champion_id,
                    key.patch_version,
                    serialized,
                    computed_at
                ],
            )
            .map_err(|err| format!("Failed to upsert build: {}", err))?;
            Ok(())
        }))
    }

    /// Removes every entry for one mode. Idempotent: clearing an empty or
    /// unknown mode removes zero rows and is not an error.
    pub fn clear_mode(&self, game_mode_id: &str) -> Result<u64> {
        if self.is_degraded() {
            return Err(CoreError::CacheUnavailable(
                "store is degraded; clear rejected".to_string(),
            ));
        }

        let game_mode_id = game_mode_id.to_string();
        self.guard(self.with_connection(move |conn| {
            conn.execute(
                "DELETE FROM builds WHERE game_mode_id = ?1",
                params![game_mode_id],
            )
            .map(|count| count as u64)
            .map_err(|err| format!("Failed to clear mode: {}", err))
        }))
    }

    pub fn entry_count(&self) -> Result<u64> {
        self.guard(self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM builds", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count as u64)
            .map_err(|err| format!("Failed to count builds: {}", err))
        }))
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn force_degraded(&self) {
        self.degraded.store(true, Ordering::Relaxed);
    }

    /// Probes storage; a successful probe lifts the degraded mode.
    pub fn health_check(&self) -> bool {
        let probe = self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM builds", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|err| format!("Health probe failed: {}", err))
        });

        match probe {
            Ok(_) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!("Build store healthy again; leaving degraded mode");
                }
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "Build store health probe failed");
                self.degraded.store(true, Ordering::Relaxed);
                false
            }
        }
    }

    /// Maps a storage failure into the degraded state and the
    /// `CacheUnavailable` error kind.
    fn guard<T>(&self, result: std::result::Result<T, String>) -> Result<T> {
        result.map_err(|err| {
            if !self.degraded.swap(true, Ordering::Relaxed) {
                tracing::warn!(error = %err, "Build store entering degraded (miss-only) mode");
            }
            CoreError::CacheUnavailable(err)
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> std::result::Result<T, String>,
    ) -> std::result::Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> std::result::Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create store data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }

    fn init_schema(&self) -> std::result::Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS builds (
                    game_mode_id TEXT NOT NULL,
                    champion_id TEXT NOT NULL,
                    patch_version TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    computed_at TEXT NOT NULL,
                    PRIMARY KEY (game_mode_id, champion_id, patch_version)
                 );
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }
}
