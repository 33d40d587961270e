//! Canonical phase state machine for the tracked game client.
//!
//! Transitions are driven solely by adapter events. Disconnection is not a
//! phase transition: it is a side channel that forces the offline sentinel
//! immediately, regardless of the last phase. Reconnection re-seeds the
//! context from the next event; no continuity is assumed across a
//! disconnect.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;

use loadout_protocol::{AdapterEvent, GameContext, PhaseState, PushEvent};

use crate::broadcast::SyncBroadcaster;

/// Modes this build knows how to recommend for. Events for other modes
/// still track phase, but surfaces render a "mode not supported" state.
static SUPPORTED_MODES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "CLASSIC",
        "ARAM",
        "URF",
        "ONEFORALL",
        "ARENA",
        "NEXUSBLITZ",
        "ULTBOOK",
    ]
    .into_iter()
    .collect()
});

pub fn is_supported_mode(mode_id: &str) -> bool {
    SUPPORTED_MODES.contains(mode_id)
}

pub struct StatusTracker {
    context: Mutex<GameContext>,
    broadcaster: Arc<SyncBroadcaster>,
}

impl StatusTracker {
    /// Starts offline; the first adapter event seeds the real context.
    pub fn new(broadcaster: Arc<SyncBroadcaster>) -> Self {
        StatusTracker {
            context: Mutex::new(GameContext::offline()),
            broadcaster,
        }
    }

    /// Applies one adapter event and notifies subscribers on change.
    pub fn on_adapter_event(&self, event: &AdapterEvent) {
        let next = if event.connected {
            let phase = event
                .phase
                .as_deref()
                .map(PhaseState::from_client_str)
                .unwrap_or(PhaseState::None);
            let mode_id = event.mode_id.clone().unwrap_or_default();
            let is_supported_mode = is_supported_mode(&mode_id);
            GameContext {
                phase,
                connected: true,
                mode_id,
                is_supported_mode,
            }
        } else {
            GameContext::offline()
        };

        let changed = {
            let mut current = self
                .context
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        };

        if changed {
            tracing::info!(
                phase = next.phase.as_str(),
                connected = next.connected,
                mode_id = %next.mode_id,
                "Client status changed"
            );
            self.broadcaster
                .publish(PushEvent::StatusChanged { context: next });
        }
    }

    /// Latest snapshot, synchronously and without blocking on other keys.
    pub fn current_status(&self) -> GameContext {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (StatusTracker, Arc<SyncBroadcaster>) {
        let broadcaster = Arc::new(SyncBroadcaster::new());
        (StatusTracker::new(Arc::clone(&broadcaster)), broadcaster)
    }

    fn event(connected: bool, phase: Option<&str>, mode_id: Option<&str>) -> AdapterEvent {
        AdapterEvent {
            recorded_at: "2026-08-20T12:00:00Z".to_string(),
            connected,
            phase: phase.map(|s| s.to_string()),
            mode_id: mode_id.map(|s| s.to_string()),
        }
    }

    #[test]
    fn starts_offline() {
        let (tracker, _) = tracker();
        assert_eq!(tracker.current_status(), GameContext::offline());
    }

    #[test]
    fn current_status_reflects_latest_event() {
        let (tracker, _) = tracker();
        tracker.on_adapter_event(&event(true, Some("Lobby"), Some("ARAM")));
        tracker.on_adapter_event(&event(true, Some("ChampSelect"), Some("ARAM")));

        let status = tracker.current_status();
        assert_eq!(status.phase, PhaseState::ChampSelect);
        assert!(status.connected);
        assert_eq!(status.mode_id, "ARAM");
        assert!(status.is_supported_mode);
    }

    #[test]
    fn disconnect_forces_offline_regardless_of_phase() {
        let (tracker, _) = tracker();
        tracker.on_adapter_event(&event(true, Some("InProgress"), Some("CLASSIC")));
        tracker.on_adapter_event(&event(false, None, None));

        let status = tracker.current_status();
        assert!(!status.connected);
        assert_eq!(status.phase, PhaseState::None);
        assert_eq!(status.mode_id, "");
    }

    #[test]
    fn reconnect_reseeds_from_next_event() {
        let (tracker, _) = tracker();
        tracker.on_adapter_event(&event(true, Some("ChampSelect"), Some("CLASSIC")));
        tracker.on_adapter_event(&event(false, None, None));
        tracker.on_adapter_event(&event(true, Some("Reconnect"), Some("URF")));

        let status = tracker.current_status();
        assert!(status.connected);
        assert_eq!(status.phase, PhaseState::Reconnect);
        assert_eq!(status.mode_id, "URF");
    }

    #[test]
    fn unknown_phase_maps_to_idle() {
        let (tracker, _) = tracker();
        tracker.on_adapter_event(&event(true, Some("SomeFuturePhase"), Some("CLASSIC")));
        assert_eq!(tracker.current_status().phase, PhaseState::None);
        assert!(tracker.current_status().connected);
    }

    #[test]
    fn unsupported_mode_is_flagged() {
        let (tracker, _) = tracker();
        tracker.on_adapter_event(&event(true, Some("Lobby"), Some("TUTORIAL")));
        assert!(!tracker.current_status().is_supported_mode);
    }

    #[test]
    fn status_changes_are_published_in_order() {
        let (tracker, broadcaster) = tracker();
        let sub = broadcaster.attach(loadout_protocol::Surface::Main, tracker.current_status());

        tracker.on_adapter_event(&event(true, Some("Lobby"), Some("CLASSIC")));
        tracker.on_adapter_event(&event(true, Some("Matchmaking"), Some("CLASSIC")));
        tracker.on_adapter_event(&event(false, None, None));

        let phases: Vec<(PhaseState, bool)> = sub
            .receiver
            .try_iter()
            .map(|e| match e {
                PushEvent::StatusChanged { context } => (context.phase, context.connected),
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                (PhaseState::None, false), // attach seed
                (PhaseState::Lobby, true),
                (PhaseState::Matchmaking, true),
                (PhaseState::None, false),
            ]
        );
    }

    #[test]
    fn duplicate_events_do_not_republish() {
        let (tracker, broadcaster) = tracker();
        tracker.on_adapter_event(&event(true, Some("Lobby"), Some("CLASSIC")));
        let sub = broadcaster.attach(loadout_protocol::Surface::Main, tracker.current_status());

        tracker.on_adapter_event(&event(true, Some("Lobby"), Some("CLASSIC")));

        let events: Vec<PushEvent> = sub.receiver.try_iter().collect();
        assert_eq!(events.len(), 1); // seed only
    }
}
