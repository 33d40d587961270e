//! Capability-scoped handles for the two UI surfaces.
//!
//! The main dashboard and the in-game overlay talk to the same core
//! services, but through handles that only expose the operations their
//! surface was granted. A call outside the grant fails fast with
//! `CapabilityUnavailable` instead of silently doing nothing, so a wiring
//! mistake shows up in logs on the first call rather than as a dead
//! button.
//!
//! Shared operations on both handles: status reads, build resolution,
//! string translation, event subscription. The main handle additionally
//! owns settings and cache administration; the overlay handle owns its
//! presentation toggles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use loadout_protocol::{BuildResult, GameContext, PushEvent, Surface};

use crate::broadcast::{Subscription, SyncBroadcaster};
use crate::config::{self, Settings};
use crate::error::{CoreError, Result};
use crate::resolver::BuildResolver;
use crate::store::BuildStore;
use crate::tracker::StatusTracker;

/// Destination for settings writes. The core never persists settings
/// itself; the hosting process decides where they live.
pub trait SettingsSink: Send + Sync {
    fn write(&self, settings: &Settings) -> std::result::Result<(), String>;
}

/// Overlay rendering density. Cycles Full -> Compact -> Hidden -> Full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Full,
    Compact,
    Hidden,
}

impl DisplayMode {
    pub fn next(self) -> Self {
        match self {
            DisplayMode::Full => DisplayMode::Compact,
            DisplayMode::Compact => DisplayMode::Hidden,
            DisplayMode::Hidden => DisplayMode::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayState {
    pub visible: bool,
    pub interactive: bool,
    pub display_mode: DisplayMode,
}

/// Outcome of a surface-initiated resolve. `Superseded` means the surface
/// moved on to a different selection while this resolve was in flight;
/// the stale payload is withheld so the UI never flashes the wrong build.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildResponse {
    Ready(BuildResult),
    Superseded,
}

/// Shared core wiring behind both surface handles.
pub struct CoreServices {
    tracker: Arc<StatusTracker>,
    resolver: Arc<BuildResolver>,
    store: Arc<BuildStore>,
    broadcaster: Arc<SyncBroadcaster>,
    settings_sink: Arc<dyn SettingsSink>,
    settings: Mutex<Settings>,
    strings: RwLock<HashMap<String, String>>,
    overlay: Mutex<OverlayState>,
}

impl CoreServices {
    pub fn new(
        tracker: Arc<StatusTracker>,
        resolver: Arc<BuildResolver>,
        store: Arc<BuildStore>,
        broadcaster: Arc<SyncBroadcaster>,
        settings_sink: Arc<dyn SettingsSink>,
        settings: Settings,
    ) -> Self {
        let strings = config::load_string_table(&settings.language);
        let overlay = OverlayState {
            visible: settings.show_overlay_on_launch,
            interactive: false,
            display_mode: DisplayMode::Full,
        };
        CoreServices {
            tracker,
            resolver,
            store,
            broadcaster,
            settings_sink,
            settings: Mutex::new(settings),
            strings: RwLock::new(strings),
            overlay: Mutex::new(overlay),
        }
    }

    pub fn store(&self) -> &BuildStore {
        &self.store
    }

    pub fn resolver(&self) -> &BuildResolver {
        &self.resolver
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn broadcaster(&self) -> &SyncBroadcaster {
        &self.broadcaster
    }

    pub fn overlay_state(&self) -> OverlayState {
        *self.overlay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Selection {
    generation: u64,
    key: Option<(String, String)>,
}

pub struct SurfaceHandle {
    surface: Surface,
    services: Arc<CoreServices>,
    selection: Mutex<Selection>,
}

fn surface_name(surface: Surface) -> &'static str {
    match surface {
        Surface::Main => "main",
        Surface::Overlay => "overlay",
    }
}

impl SurfaceHandle {
    pub fn main(services: Arc<CoreServices>) -> Self {
        SurfaceHandle::attach(Surface::Main, services)
    }

    pub fn overlay(services: Arc<CoreServices>) -> Self {
        SurfaceHandle::attach(Surface::Overlay, services)
    }

    fn attach(surface: Surface, services: Arc<CoreServices>) -> Self {
        SurfaceHandle {
            surface,
            services,
            selection: Mutex::new(Selection {
                generation: 0,
                key: None,
            }),
        }
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    fn require(&self, granted_to: Surface, operation: &'static str) -> Result<()> {
        if self.surface == granted_to {
            Ok(())
        } else {
            tracing::warn!(
                surface = surface_name(self.surface),
                operation,
                "Capability check failed"
            );
            Err(CoreError::CapabilityUnavailable {
                surface: surface_name(self.surface),
                operation,
            })
        }
    }

    // Operations granted to both surfaces.

    pub fn current_status(&self) -> GameContext {
        self.services.tracker.current_status()
    }

    /// Resolves a build for this surface's current selection. If the
    /// surface moves on to a different (mode, champion) while this
    /// resolve is still in flight, the result is reported as superseded.
    /// Re-requesting the same selection does not supersede anything.
    pub fn resolve_build(&self, game_mode_id: &str, champion_id: &str) -> Result<BuildResponse> {
        let requested = (game_mode_id.to_string(), champion_id.to_string());
        let generation = {
            let mut selection = self
                .selection
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if selection.key.as_ref() != Some(&requested) {
                selection.generation += 1;
                selection.key = Some(requested);
            }
            selection.generation
        };

        let build = self.services.resolver.resolve(game_mode_id, champion_id)?;

        let current = self
            .selection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation;
        if current != generation {
            tracing::debug!(
                surface = surface_name(self.surface),
                champion_id,
                "Resolve superseded by a newer selection"
            );
            return Ok(BuildResponse::Superseded);
        }
        Ok(BuildResponse::Ready(build))
    }

    /// Looks a key up in the active language's string table. Unknown keys
    /// pass through unchanged so missing translations stay visible.
    pub fn translated(&self, key: &str) -> String {
        self.services
            .strings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    pub fn subscribe(&self) -> Subscription {
        self.services
            .broadcaster
            .attach(self.surface, self.current_status())
    }

    // Main-only operations.

    pub fn settings(&self) -> Result<Settings> {
        self.require(Surface::Main, "settings")?;
        Ok(self
            .services
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    /// Forwards new settings to the sink, then adopts them. A language
    /// change reloads the string table for both surfaces.
    pub fn update_settings(&self, next: Settings) -> Result<()> {
        self.require(Surface::Main, "update_settings")?;

        self.services
            .settings_sink
            .write(&next)
            .map_err(CoreError::SettingsWriteFailed)?;

        let language_changed = {
            let mut current = self
                .services
                .settings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let changed = current.language != next.language;
            *current = next.clone();
            changed
        };
        if language_changed {
            let table = config::load_string_table(&next.language);
            *self
                .services
                .strings
                .write()
                .unwrap_or_else(PoisonError::into_inner) = table;
            tracing::info!(language = %next.language, "String table reloaded");
        }
        Ok(())
    }

    /// Drops every cached build for a mode and announces the purge.
    /// Resolves already past their cache check are unaffected; they will
    /// write back through on completion.
    pub fn clear_cache(&self, game_mode_id: &str) -> Result<u64> {
        self.require(Surface::Main, "clear_cache")?;

        let removed = self.services.store.clear_mode(game_mode_id)?;
        tracing::info!(game_mode_id, removed, "Cache cleared");
        self.services.broadcaster.publish(PushEvent::CacheCleared {
            game_mode_id: game_mode_id.to_string(),
            removed,
        });
        Ok(removed)
    }

    // Overlay-only operations.

    pub fn set_overlay_visible(&self, visible: bool) -> Result<OverlayState> {
        self.require(Surface::Overlay, "set_overlay_visible")?;
        let mut overlay = self
            .services
            .overlay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        overlay.visible = visible;
        Ok(*overlay)
    }

    pub fn set_interactive(&self, interactive: bool) -> Result<OverlayState> {
        self.require(Surface::Overlay, "set_interactive")?;
        let mut overlay = self
            .services
            .overlay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        overlay.interactive = interactive;
        Ok(*overlay)
    }

    pub fn cycle_display_mode(&self) -> Result<OverlayState> {
        self.require(Surface::Overlay, "cycle_display_mode")?;
        let mut overlay = self
            .services
            .overlay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        overlay.display_mode = overlay.display_mode.next();
        Ok(*overlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::BuildProvider;
    use loadout_protocol::BuildKey;
    use std::sync::mpsc;

    struct StaticProvider;

    impl BuildProvider for StaticProvider {
        fn compute(&self, key: &BuildKey) -> std::result::Result<BuildResult, String> {
            Ok(BuildResult {
                item_ids: vec![1001],
                skill_order: vec![key.champion_id.clone()],
                summoner_spell_ids: vec![4],
                synergies: Vec::new(),
            })
        }
    }

    struct RecordingSink {
        written: Mutex<Vec<Settings>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new() -> Self {
            RecordingSink {
                written: Mutex::new(Vec::new()),
                fail: false,
            }
        }
    }

    impl SettingsSink for RecordingSink {
        fn write(&self, settings: &Settings) -> std::result::Result<(), String> {
            if self.fail {
                return Err("disk full".to_string());
            }
            self.written.lock().unwrap().push(settings.clone());
            Ok(())
        }
    }

    fn services_with(
        provider: Arc<dyn BuildProvider>,
        sink: Arc<RecordingSink>,
    ) -> (Arc<CoreServices>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = Arc::new(BuildStore::new(temp_dir.path().join("builds.db")).expect("store"));
        let broadcaster = Arc::new(SyncBroadcaster::new());
        let tracker = Arc::new(StatusTracker::new(Arc::clone(&broadcaster)));
        let resolver = Arc::new(BuildResolver::new(
            Arc::clone(&store),
            provider,
            Arc::clone(&broadcaster),
            "14.1",
        ));
        let services = Arc::new(CoreServices::new(
            tracker,
            resolver,
            store,
            broadcaster,
            sink,
            Settings::default(),
        ));
        (services, temp_dir)
    }

    fn services() -> (Arc<CoreServices>, Arc<RecordingSink>, tempfile::TempDir) {
        let sink = Arc::new(RecordingSink::new());
        let (services, dir) = services_with(Arc::new(StaticProvider), Arc::clone(&sink));
        (services, sink, dir)
    }

    #[test]
    fn overlay_cannot_clear_cache() {
        let (services, _, _dir) = services();
        let overlay = SurfaceHandle::overlay(services);

        let err = overlay.clear_cache("ARAM").unwrap_err();
        assert!(matches!(
            err,
            CoreError::CapabilityUnavailable {
                surface: "overlay",
                operation: "clear_cache"
            }
        ));
    }

    #[test]
    fn main_cannot_toggle_overlay_presentation() {
        let (services, _, _dir) = services();
        let main = SurfaceHandle::main(services);

        assert!(matches!(
            main.set_overlay_visible(true),
            Err(CoreError::CapabilityUnavailable { .. })
        ));
        assert!(matches!(
            main.set_interactive(true),
            Err(CoreError::CapabilityUnavailable { .. })
        ));
        assert!(matches!(
            main.cycle_display_mode(),
            Err(CoreError::CapabilityUnavailable { .. })
        ));
    }

    #[test]
    fn both_surfaces_can_resolve_and_read_status() {
        let (services, _, _dir) = services();
        let main = SurfaceHandle::main(Arc::clone(&services));
        let overlay = SurfaceHandle::overlay(services);

        assert_eq!(main.current_status(), GameContext::offline());
        assert_eq!(overlay.current_status(), GameContext::offline());

        let from_main = main.resolve_build("ARAM", "Lux").expect("main resolve");
        let from_overlay = overlay
            .resolve_build("ARAM", "Lux")
            .expect("overlay resolve");
        assert_eq!(from_main, from_overlay);
        assert!(matches!(from_main, BuildResponse::Ready(_)));
    }

    #[test]
    fn clear_cache_publishes_purge_with_count() {
        let (services, _, _dir) = services();
        let main = SurfaceHandle::main(Arc::clone(&services));
        main.resolve_build("ARAM", "Lux").expect("resolve");
        main.resolve_build("ARAM", "Jinx").expect("resolve");

        let sub = main.subscribe();
        let removed = main.clear_cache("ARAM").expect("clear");
        assert_eq!(removed, 2);

        let cleared: Vec<_> = sub
            .receiver
            .try_iter()
            .filter(|e| matches!(e, PushEvent::CacheCleared { .. }))
            .collect();
        assert_eq!(
            cleared,
            vec![PushEvent::CacheCleared {
                game_mode_id: "ARAM".to_string(),
                removed: 2,
            }]
        );
    }

    #[test]
    fn superseded_resolve_withholds_stale_build() {
        struct GatedProvider {
            started: mpsc::Sender<()>,
            release: Mutex<mpsc::Receiver<()>>,
        }

        impl BuildProvider for GatedProvider {
            fn compute(&self, key: &BuildKey) -> std::result::Result<BuildResult, String> {
                if key.champion_id == "Slow" {
                    let _ = self.started.send(());
                    let _ = self
                        .release
                        .lock()
                        .unwrap()
                        .recv_timeout(std::time::Duration::from_secs(5));
                }
                Ok(BuildResult::default())
            }
        }

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let provider = Arc::new(GatedProvider {
            started: started_tx,
            release: Mutex::new(release_rx),
        });
        let sink = Arc::new(RecordingSink::new());
        let (services, _dir) = services_with(provider, sink);
        let main = Arc::new(SurfaceHandle::main(services));

        let slow_handle = {
            let main = Arc::clone(&main);
            std::thread::spawn(move || main.resolve_build("ARAM", "Slow"))
        };

        // Wait until the slow resolve is inside the provider, then move
        // the surface's selection on.
        started_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("slow resolve started");
        let fast = main.resolve_build("ARAM", "Fast").expect("fast resolve");
        assert!(matches!(fast, BuildResponse::Ready(_)));

        release_tx.send(()).expect("release slow resolve");
        let slow = slow_handle.join().expect("thread").expect("slow resolve");
        assert_eq!(slow, BuildResponse::Superseded);
    }

    #[test]
    fn update_settings_forwards_to_sink() {
        let (services, sink, _dir) = services();
        let main = SurfaceHandle::main(services);

        let mut next = main.settings().expect("read settings");
        next.overlay_hotkey = "Alt+L".to_string();
        main.update_settings(next.clone()).expect("update");

        assert_eq!(sink.written.lock().unwrap().as_slice(), &[next.clone()]);
        assert_eq!(main.settings().expect("re-read"), next);
    }

    #[test]
    fn failed_settings_write_keeps_old_settings() {
        let sink = Arc::new(RecordingSink {
            written: Mutex::new(Vec::new()),
            fail: true,
        });
        let (services, _dir) = services_with(Arc::new(StaticProvider), Arc::clone(&sink));
        let main = SurfaceHandle::main(services);

        let before = main.settings().expect("read");
        let mut next = before.clone();
        next.language = "de".to_string();

        let err = main.update_settings(next).unwrap_err();
        assert!(matches!(err, CoreError::SettingsWriteFailed(_)));
        assert_eq!(main.settings().expect("re-read"), before);
    }

    #[test]
    fn overlay_cannot_read_settings() {
        let (services, _, _dir) = services();
        let overlay = SurfaceHandle::overlay(services);
        assert!(matches!(
            overlay.settings(),
            Err(CoreError::CapabilityUnavailable { .. })
        ));
    }

    #[test]
    fn display_mode_cycles_through_all_states() {
        let (services, _, _dir) = services();
        let overlay = SurfaceHandle::overlay(Arc::clone(&services));

        assert_eq!(services.overlay_state().display_mode, DisplayMode::Full);
        assert_eq!(
            overlay.cycle_display_mode().expect("cycle").display_mode,
            DisplayMode::Compact
        );
        assert_eq!(
            overlay.cycle_display_mode().expect("cycle").display_mode,
            DisplayMode::Hidden
        );
        assert_eq!(
            overlay.cycle_display_mode().expect("cycle").display_mode,
            DisplayMode::Full
        );
    }

    #[test]
    fn overlay_toggles_are_reflected_in_shared_state() {
        let (services, _, _dir) = services();
        let overlay = SurfaceHandle::overlay(Arc::clone(&services));

        overlay.set_overlay_visible(true).expect("visible");
        overlay.set_interactive(true).expect("interactive");

        let state = services.overlay_state();
        assert!(state.visible);
        assert!(state.interactive);
    }

    #[test]
    fn unknown_translation_key_passes_through() {
        let (services, _, _dir) = services();
        let overlay = SurfaceHandle::overlay(services);
        assert_eq!(overlay.translated("phase.champ_select"), "phase.champ_select");
    }

    #[test]
    fn subscribe_seeds_with_current_status() {
        let (services, _, _dir) = services();
        let overlay = SurfaceHandle::overlay(services);

        let sub = overlay.subscribe();
        match sub.receiver.try_recv().unwrap() {
            PushEvent::StatusChanged { context } => assert_eq!(context, GameContext::offline()),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
