//! Error types for loadout-core operations.
//!
//! Variants are cloneable so a single failed recompute can settle every
//! waiter attached to the same refresh ticket with an identical outcome.

/// All errors that can occur in loadout-core operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// The game-client adapter is unreachable. Non-fatal: the tracker
    /// degrades to the offline sentinel and surfaces show a retryable state.
    #[error("game client adapter is disconnected")]
    AdapterDisconnected,

    /// A surface invoked an operation it was never granted. Programming
    /// error on the caller's side; fails fast instead of no-opping.
    #[error("operation '{operation}' is not granted to the {surface} surface")]
    CapabilityUnavailable {
        surface: &'static str,
        operation: &'static str,
    },

    /// Persistence I/O or corruption. The store degrades to miss-only
    /// until a health probe succeeds; the process keeps running.
    #[error("build cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The build-data provider failed to recompute. Propagated to all
    /// current waiters for the key; the next resolve retries fresh.
    #[error("build recompute failed for {champion_id} in {game_mode_id}: {details}")]
    BuildComputeFailed {
        game_mode_id: String,
        champion_id: String,
        details: String,
    },

    #[error("settings write failed: {0}")]
    SettingsWriteFailed(String),
}

/// Convenience type alias for Results using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}

impl CoreError {
    /// Stable code for the wire protocol, mirroring the error taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::AdapterDisconnected => "adapter_disconnected",
            CoreError::CapabilityUnavailable { .. } => "capability_unavailable",
            CoreError::CacheUnavailable(_) => "cache_unavailable",
            CoreError::BuildComputeFailed { .. } => "build_compute_failed",
            CoreError::SettingsWriteFailed(_) => "settings_write_failed",
        }
    }
}
