// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Outbound stanza pipeline (C6).
//!
//! Runs the registered modules' `filter_outgoing` hooks in registration
//! order, then hands the stanza to the transport (§4.2 "Outbound
//! contract"). Grounded on the filter-chain-then-writer shape of
//! `stanzastream/mod.rs`'s transmit path, minus the retransmit queue (owned
//! by the stream-management role here, not by this pipeline).

use crate::event::Stanza;
use crate::registry::ModuleRegistry;
use crate::transport::Transport;

/// Runs the outbound filter chain and delivers the result to `transport`.
pub async fn send<T: Transport>(
    registry: &ModuleRegistry,
    transport: &T,
    mut stanza: Stanza,
) -> Result<(), crate::error::Error> {
    for module in registry.iter() {
        module.filter_outgoing(&mut stanza);
    }
    log::trace!("sending stanza id={:?}", stanza.id());
    transport.send_stanza(&stanza).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCondition;
    use crate::registry::{Module, ModuleId, ModuleRegistryBuilder};
    use crate::transport::{CompressionMethod, TransportState};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use xmpp_parsers::iq::{Iq, IqType};

    struct TagModule;

    impl Module for TagModule {
        fn id(&self) -> ModuleId {
            ModuleId("test.tag")
        }
        fn criteria(&self, _stanza: &Stanza) -> bool {
            false
        }
        fn process<'a>(
            &'a self,
            _stanza: Stanza,
        ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCondition>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }
        fn filter_outgoing(&self, stanza: &mut Stanza) {
            if let Stanza::Iq(iq) = stanza {
                iq.id.push_str("-tagged");
            }
        }
    }

    struct RecordingTransport {
        sent_id: Mutex<Option<String>>,
        called: AtomicBool,
    }

    impl Transport for RecordingTransport {
        fn state(&self) -> TransportState {
            TransportState::Connected
        }

        async fn send_stanza(&self, stanza: &Stanza) -> Result<(), crate::error::Error> {
            self.called.store(true, Ordering::SeqCst);
            *self.sent_id.lock().unwrap() = stanza.id().map(str::to_string);
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
            Ok(())
        }
    }

    #[tokio::test]
    async fn outgoing_filters_run_before_transport_send() {
        let registry = Arc::new(ModuleRegistryBuilder::new().register(Arc::new(TagModule)).build());
        let transport = RecordingTransport {
            sent_id: Mutex::new(None),
            called: AtomicBool::new(false),
        };
        let stanza = Stanza::Iq(Iq {
            from: None,
            to: None,
            id: "1".to_string(),
            payload: IqType::Result(None),
        });
        send(&registry, &transport, stanza).await.unwrap();
        assert!(transport.called.load(Ordering::SeqCst));
        assert_eq!(transport.sent_id.lock().unwrap().as_deref(), Some("1-tagged"));
    }
}
