//! Build resolution with per-key refresh deduplication.
//!
//! A resolve is cache-first. On a miss, at most one recompute runs per
//! build key at any moment: the first caller becomes the ticket owner and
//! drives the provider, every concurrent caller for the same key parks on
//! the ticket and receives the owner's outcome, success or failure alike.
//! Tickets are removed before they settle, so a resolve arriving after a
//! failure starts a fresh recompute instead of replaying the stale error.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};

use loadout_protocol::{BuildKey, BuildResult, PushEvent};

use crate::broadcast::SyncBroadcaster;
use crate::error::{CoreError, Result};
use crate::store::{BuildStore, CacheLookup};

/// Source of fresh build recommendations. Implementations may hit disk or
/// the network; the resolver only requires that `compute` is safe to call
/// from multiple threads for distinct keys.
pub trait BuildProvider: Send + Sync {
    fn compute(&self, key: &BuildKey) -> std::result::Result<BuildResult, String>;
}

struct RefreshTicket {
    outcome: Mutex<Option<Result<BuildResult>>>,
    settled: Condvar,
}

impl RefreshTicket {
    fn new() -> Self {
        RefreshTicket {
            outcome: Mutex::new(None),
            settled: Condvar::new(),
        }
    }

    fn settle(&self, outcome: Result<BuildResult>) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(outcome);
        self.settled.notify_all();
    }

    fn wait(&self) -> Result<BuildResult> {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self
                .settled
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub struct BuildResolver {
    store: Arc<BuildStore>,
    provider: Arc<dyn BuildProvider>,
    broadcaster: Arc<SyncBroadcaster>,
    current_patch: RwLock<String>,
    tickets: Mutex<HashMap<BuildKey, Arc<RefreshTicket>>>,
}

impl BuildResolver {
    pub fn new(
        store: Arc<BuildStore>,
        provider: Arc<dyn BuildProvider>,
        broadcaster: Arc<SyncBroadcaster>,
        initial_patch: impl Into<String>,
    ) -> Self {
        BuildResolver {
            store,
            provider,
            broadcaster,
            current_patch: RwLock::new(initial_patch.into()),
            tickets: Mutex::new(HashMap::new()),
        }
    }

    pub fn current_patch(&self) -> String {
        self.current_patch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Advances the patch the resolver keys against. Cached entries for
    /// older patches are not touched here; the store evicts them lazily on
    /// the next read.
    pub fn set_current_patch(&self, patch: &str) {
        let mut current = self
            .current_patch
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != patch {
            tracing::info!(from = %current, to = %patch, "Current patch changed");
            *current = patch.to_string();
        }
    }

    /// Resolves a build for (mode, champion) under the current patch.
    ///
    /// Cache hits return immediately and publish nothing. Misses either
    /// start a recompute or join the one already in flight for the same
    /// key; a successful recompute is written through to the store and
    /// announced as a `BuildReady` push event.
    pub fn resolve(&self, game_mode_id: &str, champion_id: &str) -> Result<BuildResult> {
        let key = BuildKey::new(game_mode_id, champion_id, self.current_patch());

        match self.store.get(&key) {
            Ok(CacheLookup::Hit(entry)) => {
                tracing::debug!(champion_id = %key.champion_id, "Build cache hit");
                return Ok(entry.payload);
            }
            Ok(CacheLookup::Miss) => {}
            Err(err) => {
                // Read failures degrade the store; the resolve itself can
                // still succeed straight from the provider.
                tracing::warn!(error = %err, "Cache read failed; treating as miss");
            }
        }

        let (ticket, owner) = {
            let mut tickets = self.tickets.lock().unwrap_or_else(PoisonError::into_inner);
            match tickets.get(&key) {
                Some(ticket) => (Arc::clone(ticket), false),
                None => {
                    let ticket = Arc::new(RefreshTicket::new());
                    tickets.insert(key.clone(), Arc::clone(&ticket));
                    (ticket, true)
                }
            }
        };

        if !owner {
            tracing::debug!(champion_id = %key.champion_id, "Joining in-flight recompute");
            return ticket.wait();
        }

        let outcome = self.recompute(&key);

        // Drop the ticket before settling it, so a resolve that arrives
        // after a failure retries fresh instead of inheriting the error.
        {
            let mut tickets = self.tickets.lock().unwrap_or_else(PoisonError::into_inner);
            tickets.remove(&key);
        }
        ticket.settle(outcome.clone());

        outcome
    }

    fn recompute(&self, key: &BuildKey) -> Result<BuildResult> {
        let build = self
            .provider
            .compute(key)
            .map_err(|details| CoreError::BuildComputeFailed {
                game_mode_id: key.game_mode_id.clone(),
                champion_id: key.champion_id.clone(),
                details,
            })?;

        // Write-through is best effort: a degraded store costs us the
        // cache entry, not the resolve.
        if let Err(err) = self.store.put(key, &build) {
            tracing::warn!(error = %err, champion_id = %key.champion_id, "Write-through failed");
        }

        tracing::info!(
            game_mode_id = %key.game_mode_id,
            champion_id = %key.champion_id,
            patch_version = %key.patch_version,
            "Build recomputed"
        );
        self.broadcaster.publish(PushEvent::BuildReady {
            key: key.clone(),
            build: build.clone(),
        });

        Ok(build)
    }
}
