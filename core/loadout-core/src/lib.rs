//! Core engine for Loadout: client phase tracking, the patch-aware build
//! cache, deduplicated build resolution, and the capability-scoped
//! boundary the UI surfaces talk through.
//!
//! The crate is UI-agnostic and synchronous. The hosting process (the
//! `loadoutd` daemon) owns sockets, threads, and persistence paths, and
//! injects the build-data provider and settings sink at construction.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod resolver;
pub mod store;
pub mod surface;
pub mod tracker;

pub use broadcast::{Subscription, SyncBroadcaster};
pub use config::{load_settings, load_string_table, Settings};
pub use error::{CoreError, Result};
pub use resolver::{BuildProvider, BuildResolver};
pub use store::{BuildStore, CacheEntry, CacheLookup};
pub use surface::{
    BuildResponse, CoreServices, DisplayMode, OverlayState, SettingsSink, SurfaceHandle,
};
pub use tracker::{is_supported_mode, StatusTracker};
