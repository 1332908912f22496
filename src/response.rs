// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Outstanding-response tracker with deadline expiry (C3).
//!
//! Grounded on the `IqResponseTracker` / `IqResponseToken` pair (see
//! `tokio-xmpp/src/client/iq.rs` in the source tree this crate was cut
//! from), keyed the same way: `(Option<Jid>, String)` i.e. `(from,
//! id)`. That tracker has no notion of a deadline ("there are no internal
//! timeouts for Iq responses"); §4.6 requires one, so entries here carry a
//! deadline and a background reaper sweeps expired ones.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use xmpp_parsers::jid::Jid;

use crate::error::Error;
use crate::event::Stanza;

type Key = (Option<Jid>, String);

struct Entry {
    deadline: Instant,
    sink: oneshot::Sender<Result<Stanza, Error>>,
}

struct Shared {
    map: Mutex<BTreeMap<Key, Entry>>,
    notify: Notify,
}

/// Tracks stanzas awaiting a response, keyed by `(from, id)`, and expires
/// them after their deadline.
///
/// A [`ResponseManager`] owns a background reaper task (spawned from
/// [`ResponseManager::new`]) that wakes either when the next deadline
/// elapses or when a new, earlier deadline is registered.
pub struct ResponseManager {
    shared: Arc<Shared>,
    reaper: tokio::task::JoinHandle<()>,
}

impl ResponseManager {
    /// Create a tracker and spawn its reaper task on the current runtime.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            map: Mutex::new(BTreeMap::new()),
            notify: Notify::new(),
        });
        let reaper = tokio::spawn(reap(Arc::clone(&shared)));
        Self { shared, reaper }
    }

    /// Register a pending response, returning a receiver that resolves with
    /// the matched stanza or [`Error::Timeout`]/[`Error::SessionTerminated`].
    ///
    /// `id` should already be the ID assigned to the outgoing request.
    pub fn register(
        &self,
        from: Option<Jid>,
        id: String,
        timeout: Duration,
    ) -> oneshot::Receiver<Result<Stanza, Error>> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let mut map = self.shared.map.lock().unwrap();
        map.insert(
            (from, id),
            Entry {
                deadline,
                sink: tx,
            },
        );
        drop(map);
        self.shared.notify.notify_one();
        rx
    }

    /// Attempt to match an inbound stanza against a pending registration.
    ///
    /// Returns `None` (the stanza was consumed) if a match was found,
    /// `Some(stanza)` otherwise so the dispatcher can keep routing it.
    pub fn handle(&self, stanza: Stanza) -> Option<Stanza> {
        let id = stanza.id()?.to_string();
        let key = (stanza.from().cloned(), id);
        let mut map = self.shared.map.lock().unwrap();
        match map.remove(&key) {
            Some(entry) => {
                let _: Result<_, _> = entry.sink.send(Ok(stanza));
                None
            }
            None => {
                log::trace!(
                    "no pending response tracked for ({:?}, {})",
                    key.0,
                    key.1
                );
                Some(stanza)
            }
        }
    }

    /// Fail every pending registration immediately, e.g. on session
    /// teardown (§4.2 "session cleared").
    pub fn clear(&self) {
        let mut map = self.shared.map.lock().unwrap();
        for (_, entry) in std::mem::take(&mut *map) {
            let _: Result<_, _> = entry.sink.send(Err(Error::SessionTerminated));
        }
    }

    /// Number of responses currently pending.
    pub fn pending_count(&self) -> usize {
        self.shared.map.lock().unwrap().len()
    }
}

impl Drop for ResponseManager {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

impl Default for ResponseManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn reap(shared: Arc<Shared>) {
    loop {
        let sleep_until = {
            let map = shared.map.lock().unwrap();
            map.values().map(|e| e.deadline).min()
        };
        match sleep_until {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shared.notify.notified() => continue,
                }
            }
            None => {
                shared.notify.notified().await;
                continue;
            }
        }

        let now = Instant::now();
        let mut map = shared.map.lock().unwrap();
        let expired: Vec<Key> = map
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if let Some(entry) = map.remove(&key) {
                log::debug!("response for ({:?}, {}) timed out", key.0, key.1);
                let _: Result<_, _> = entry.sink.send(Err(Error::Timeout));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmpp_parsers::iq::{Iq, IqType};

    fn result_iq(id: &str) -> Stanza {
        Stanza::Iq(Iq {
            from: None,
            to: None,
            id: id.to_string(),
            payload: IqType::Result(None),
        })
    }

    #[tokio::test]
    async fn matched_response_resolves() {
        let manager = ResponseManager::new();
        let rx = manager.register(None, "1".to_string(), Duration::from_secs(5));
        assert!(manager.handle(result_iq("1")).is_none());
        let resolved = rx.await.unwrap().unwrap();
        assert_eq!(resolved.id(), Some("1"));
    }

    #[tokio::test]
    async fn unmatched_stanza_is_returned() {
        let manager = ResponseManager::new();
        let stanza = result_iq("unregistered");
        assert!(manager.handle(stanza).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_registration_times_out() {
        let manager = ResponseManager::new();
        let rx = manager.register(None, "1".to_string(), Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(50)).await;
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn clear_fails_all_pending() {
        let manager = ResponseManager::new();
        let rx = manager.register(None, "1".to_string(), Duration::from_secs(5));
        manager.clear();
        assert!(matches!(rx.await.unwrap(), Err(Error::SessionTerminated)));
    }
}
