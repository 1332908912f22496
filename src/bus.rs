// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Publish/subscribe event bus (C4).
//!
//! Recast from the "typed event classes with reflective type lookup"
//! design (see SPEC_FULL.md §9) as message passing over a
//! [`tokio::sync::broadcast`] channel carrying the [`SessionEvent`] sum
//! type; subscribers filter for the variants they care about.

use tokio::sync::broadcast;

use crate::event::SessionEvent;

const DEFAULT_CAPACITY: usize = 64;

/// Thread-safe publish/subscribe bus for [`SessionEvent`]s.
///
/// Cloning an [`EventBus`] yields a handle to the same underlying channel
/// (it is backed by an `Arc` internally via `broadcast::Sender`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a new bus with the default subscriber buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new bus with a given subscriber buffer capacity. Slow
    /// subscribers that fall behind by more than `capacity` events will
    /// observe a `Lagged` error on their next `recv()`.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Events are dropped
    /// silently if there are no subscribers.
    pub fn publish(&self, event: SessionEvent) {
        log::trace!("publishing event: {:?}", event);
        // A publish with zero subscribers returns Err; that's expected and
        // not a bug, so it's ignored.
        let _: Result<_, _> = self.tx.send(event);
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription handle returned by [`EventBus::subscribe`].
pub struct EventSubscription {
    rx: broadcast::Receiver<SessionEvent>,
}

impl EventSubscription {
    /// Wait for the next event. Returns `None` if the bus has been dropped
    /// and no events are buffered.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "event subscriber lagged, {} events were dropped",
                        skipped
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(SessionEvent::AuthSuccess);
        assert!(matches!(sub.recv().await, Some(SessionEvent::AuthSuccess)));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_the_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(SessionEvent::SmResumed);
        assert!(matches!(a.recv().await, Some(SessionEvent::SmResumed)));
        assert!(matches!(b.recv().await, Some(SessionEvent::SmResumed)));
    }
}
