// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Keepalive scheduler (C9).
//!
//! Grounded on the timeout constants in `stanzastream/worker.rs` (periodic
//! background work tied to the stream's lifetime) and on the ping-role
//! contract in §6/§4.5: ping if a ping module is registered, otherwise fall
//! back to the transport's whitespace keepalive. A failed ping only logs;
//! escalation is the transport watchdog's job (§9a, "keepalive escalation").

use std::sync::Arc;
use std::time::Duration;

use xmpp_parsers::jid::FullJid;

use crate::modules::PingModule;
use crate::transport::Transport;

/// Drives one keepalive tick. Owned by [`crate::context::SessionContext`]
/// and invoked on a `tokio::time::interval` at `Config::ping_interval`.
pub struct KeepaliveScheduler<T: Transport> {
    transport: Arc<T>,
    ping_module: Option<Arc<dyn PingModule>>,
}

impl<T: Transport> KeepaliveScheduler<T> {
    /// Build a scheduler over the given transport, optionally backed by a
    /// ping-role module.
    pub fn new(transport: Arc<T>, ping_module: Option<Arc<dyn PingModule>>) -> Self {
        Self {
            transport,
            ping_module,
        }
    }

    /// Run a single keepalive tick against `target` (the session's own
    /// bound JID, per §4.5).
    pub async fn tick(&self, target: &FullJid) {
        match &self.ping_module {
            Some(module) => {
                log::trace!("sending keepalive ping to {}", target);
                if let Err(e) = module.ping(target).await {
                    log::warn!("possible broken connection: ping failed: {}", e);
                }
            }
            None => {
                log::trace!("no ping module registered, sending whitespace keepalive");
                if let Err(e) = self.transport.send_whitespace_keepalive().await {
                    log::warn!("whitespace keepalive failed: {}", e);
                }
            }
        }
    }
}

/// Default keepalive period, used when [`crate::config::Config`] does not
/// override it (mirrors `Config::default().ping_interval`).
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::event::Stanza;
    use crate::transport::{CompressionMethod, TransportState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeTransport {
        whitespace_pings: AtomicUsize,
    }

    impl Transport for FakeTransport {
        fn state(&self) -> TransportState {
            TransportState::Connected
        }
        async fn send_stanza(&self, _stanza: &Stanza) -> Result<(), crate::error::Error> {
            Ok(())
        }
        async fn start_tls(&self) -> Result<(), crate::error::Error> {
            Ok(())
        }
        async fn start_compression(
            &self,
            _method: CompressionMethod,
        ) -> Result<(), crate::error::Error> {
            Ok(())
        }
        async fn restart_stream(&self) -> Result<(), crate::error::Error> {
            Ok(())
        }
        async fn reconnect_to(
            &self,
            _target: Option<crate::config::RedirectTarget>,
        ) -> Result<(), crate::error::Error> {
            Ok(())
        }
        async fn send_whitespace_keepalive(&self) -> Result<(), crate::error::Error> {
            self.whitespace_pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakePing {
        calls: Mutex<Vec<FullJid>>,
    }

    impl PingModule for FakePing {
        fn ping<'a>(
            &'a self,
            target: &'a FullJid,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), SessionError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.calls.lock().unwrap().push(target.clone());
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn falls_back_to_whitespace_keepalive_without_ping_module() {
        let transport = Arc::new(FakeTransport {
            whitespace_pings: AtomicUsize::new(0),
        });
        let scheduler = KeepaliveScheduler::new(Arc::clone(&transport), None);
        let target = FullJid::new("alice@ex/mobile").unwrap();
        scheduler.tick(&target).await;
        assert_eq!(transport.whitespace_pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn uses_ping_module_when_registered() {
        let transport = Arc::new(FakeTransport {
            whitespace_pings: AtomicUsize::new(0),
        });
        let ping = Arc::new(FakePing {
            calls: Mutex::new(Vec::new()),
        });
        let scheduler = KeepaliveScheduler::new(Arc::clone(&transport), Some(ping.clone()));
        let target = FullJid::new("alice@ex/mobile").unwrap();
        scheduler.tick(&target).await;
        assert_eq!(ping.calls.lock().unwrap().len(), 1);
        assert_eq!(transport.whitespace_pings.load(Ordering::SeqCst), 0);
    }
}
