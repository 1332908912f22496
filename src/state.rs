// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Observable session state and the internal negotiation phase (§3).

use tokio::sync::watch;

/// The observable state of a session (distinct from the transport's socket
/// state, see §3).
///
/// Transitions only ever flow `Disconnected -> Connecting -> Connected ->
/// Disconnecting -> Disconnected`; a reconnect resets to `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport connection, no pending negotiation.
    Disconnected,
    /// A transport connection is being established or negotiated.
    Connecting,
    /// Bind (and session establishment, or SM resume) has completed.
    Connected,
    /// `unbind`/`on_stream_close` has been requested; teardown is in
    /// progress.
    Disconnecting,
}

impl SessionState {
    /// Whether a transition to `next` is permitted by the state machine's
    /// invariant (§3).
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnecting)
                | (Connected, Disconnected)
                | (Disconnecting, Disconnected)
                | (Disconnecting, Connecting)
        )
    }
}

/// Phase of the negotiation sequencer (C7), internal to the session state
/// machine. Resets to `AwaitingFeatures` after every stream (re)start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// Waiting for `<stream:features/>`.
    AwaitingFeatures,
    /// STARTTLS requested, waiting for the transport to report success.
    StartTlsInProgress,
    /// Compression requested, waiting for the transport to report success.
    CompressionInProgress,
    /// Auth module's `login` invoked, waiting for `AuthSuccess`/`AuthFailed`.
    AuthInProgress,
    /// Bind module's `bind` invoked, waiting for `ResourceBound`/`BindFailed`.
    BindInProgress,
    /// Session module's `establish` invoked.
    SessionInProgress,
    /// Stream management `enable`/`resume` invoked.
    SmEnableInProgress,
    /// Negotiation completed successfully for this connection.
    Ready,
    /// Negotiation failed for this connection.
    Failed,
}

/// A single-owner-writes, many-subscribers-read primitive for observing
/// [`SessionState`] changes (design note "Published state").
///
/// Wraps a [`tokio::sync::watch`] channel: only [`PublishedState::set`]
/// mutates the value, and subscribers are handed a [`watch::Receiver`] that
/// they can poll independently of the session's task queue lock.
#[derive(Debug)]
pub struct PublishedState {
    tx: watch::Sender<SessionState>,
}

impl PublishedState {
    /// Create a new published cell, initialized to `Disconnected`.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Disconnected);
        Self { tx }
    }

    /// Current value.
    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Subscribe to future changes. The returned receiver immediately
    /// yields the current value on first `.changed()`/`.borrow()`.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Set a new value, enforcing the transition invariant (§3). Returns
    /// `false` (and does not mutate) if the transition is illegal.
    pub fn set(&self, next: SessionState) -> bool {
        let current = self.get();
        if !current.can_transition_to(next) {
            log::warn!(
                "rejecting illegal session state transition {:?} -> {:?}",
                current,
                next
            );
            return false;
        }
        log::debug!("session state {:?} -> {:?}", current, next);
        let _: Result<_, _> = self.tx.send(next);
        true
    }
}

impl Default for PublishedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_illegal_transition() {
        let state = PublishedState::new();
        assert!(!state.set(SessionState::Connected));
        assert_eq!(state.get(), SessionState::Disconnected);
    }

    #[test]
    fn happy_path_trace() {
        let state = PublishedState::new();
        assert!(state.set(SessionState::Connecting));
        assert!(state.set(SessionState::Connected));
        assert_eq!(state.get(), SessionState::Connected);
    }

    #[test]
    fn reconnect_resets_to_connecting() {
        let state = PublishedState::new();
        assert!(state.set(SessionState::Connecting));
        assert!(state.set(SessionState::Connected));
        assert!(state.set(SessionState::Disconnecting));
        assert!(state.set(SessionState::Connecting));
        assert_eq!(state.get(), SessionState::Connecting);
    }
}
