//! Fan-out of state deltas to attached UI surfaces.
//!
//! Each surface gets its own unbounded channel, so delivery order is FIFO
//! per surface and a slow or detached surface never blocks the others.
//! Surfaces that attach after startup receive one synthetic status snapshot
//! first, so a late overlay never starts from an unknown state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use loadout_protocol::{GameContext, PushEvent, Surface};

struct SurfaceChannel {
    id: u64,
    surface: Surface,
    sender: Sender<PushEvent>,
}

/// A surface's attachment to the broadcaster. Dropping the receiver (or
/// calling [`SyncBroadcaster::detach`]) removes the channel on the next
/// publish.
pub struct Subscription {
    pub id: u64,
    pub receiver: Receiver<PushEvent>,
}

#[derive(Default)]
pub struct SyncBroadcaster {
    surfaces: Mutex<Vec<SurfaceChannel>>,
    next_id: AtomicU64,
}

impl SyncBroadcaster {
    pub fn new() -> Self {
        SyncBroadcaster::default()
    }

    /// Attaches a surface and seeds it with the current status snapshot.
    pub fn attach(&self, surface: Surface, seed: GameContext) -> Subscription {
        let (sender, receiver) = channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Seed before the channel is visible to publish(), so the snapshot
        // is always the first event the surface observes.
        let _ = sender.send(PushEvent::StatusChanged { context: seed });

        let mut surfaces = self
            .surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        surfaces.push(SurfaceChannel {
            id,
            surface,
            sender,
        });
        tracing::debug!(id, surface = ?surface, "Surface attached");

        Subscription { id, receiver }
    }

    pub fn detach(&self, id: u64) {
        let mut surfaces = self
            .surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        surfaces.retain(|channel| channel.id != id);
    }

    /// Fans one event out to every attached surface. Channels whose
    /// receiver is gone are pruned here rather than erroring.
    pub fn publish(&self, event: PushEvent) {
        let mut surfaces = self
            .surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        surfaces.retain(|channel| match channel.sender.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(id = channel.id, surface = ?channel.surface, "Pruning detached surface");
                false
            }
        });
    }

    pub fn attached_count(&self) -> usize {
        self.surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
