// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Inbound stanza dispatch (C5), implementing §4.2's inbound contract.
//!
//! Grounded on the inbound path of `stanzastream/mod.rs` (filters, then
//! `IqResponseTracker::handle_iq`, then the feature-handler lookup) with
//! the dynamic handler list replaced by [`ModuleRegistry::iter`] and
//! `criteria`.

use std::sync::Arc;

use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::stanza_error::ErrorType;

use crate::error::ErrorCondition;
use crate::event::Stanza;
use crate::registry::ModuleRegistry;
use crate::response::ResponseManager;
use crate::transport::Transport;

/// Run one inbound stanza through the filter chain, response correlation
/// and module routing (§4.2 steps 1-6).
///
/// A module that claims a stanza via `criteria` but reports an error from
/// `process` gets that error sent back as an IQ error reply, if the
/// original was an IQ `get`/`set` (errors are not synthesized for
/// fire-and-forget stanza types). A stanza no module claims gets a
/// `feature-not-implemented` reply under the same rule.
pub async fn dispatch<T: Transport>(
    registry: &ModuleRegistry,
    responses: &ResponseManager,
    transport: &T,
    mut stanza: Stanza,
) {
    for module in registry.iter() {
        if module.filter_incoming(&mut stanza) {
            return;
        }
    }

    let stanza = match responses.handle(stanza) {
        None => return,
        Some(stanza) => stanza,
    };

    if stanza.is_iq_response() {
        log::trace!("dropping stale iq response id={:?}", stanza.id());
        return;
    }

    let mut claimed = false;
    for module in registry.iter() {
        if module.criteria(&stanza) {
            claimed = true;
            let reply_to = reply_target(&stanza);
            if let Err(condition) = module.process(stanza.clone()).await {
                if let Some((to, id)) = reply_to {
                    let reply = error_reply(to, id, &condition);
                    let _ = crate::outbound::send(registry, transport, reply).await;
                }
            }
            break;
        }
    }

    if !claimed {
        log::debug!("no module claimed stanza id={:?}", stanza.id());
        if let Some((to, id)) = reply_target(&stanza) {
            let reply = error_reply(to, id, &ErrorCondition::feature_not_implemented());
            let _ = crate::outbound::send(registry, transport, reply).await;
        }
    }
}

/// Extract `(to, id)` for an IQ `get`/`set` that warrants an error reply if
/// unhandled. Other stanza types and IQ responses never get one.
fn reply_target(stanza: &Stanza) -> Option<(Option<xmpp_parsers::jid::Jid>, String)> {
    match stanza {
        Stanza::Iq(iq) => match iq.payload {
            IqType::Get(_) | IqType::Set(_) => Some((iq.from.clone(), iq.id.clone())),
            _ => None,
        },
        _ => None,
    }
}

fn error_reply(
    to: Option<xmpp_parsers::jid::Jid>,
    id: String,
    condition: &ErrorCondition,
) -> Stanza {
    let error = condition.to_stanza_error(ErrorType::Cancel);
    Stanza::Iq(Iq {
        from: None,
        to,
        id,
        payload: IqType::Error(error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Module, ModuleId, ModuleRegistryBuilder};
    use crate::transport::{CompressionMethod, TransportState};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use xmpp_parsers::iq::{Iq, IqType};
    use xmpp_parsers::jid::Jid;

    struct CatchAllModule {
        calls: Mutex<usize>,
    }

    impl Module for CatchAllModule {
        fn id(&self) -> ModuleId {
            ModuleId("test.catch-all")
        }
        fn criteria(&self, _stanza: &Stanza) -> bool {
            true
        }
        fn process<'a>(
            &'a self,
            _stanza: Stanza,
        ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCondition>> + Send + 'a>> {
            *self.calls.lock().unwrap() += 1;
            Box::pin(async { Ok(()) })
        }
    }

    struct FailingModule;

    impl Module for FailingModule {
        fn id(&self) -> ModuleId {
            ModuleId("test.failing")
        }
        fn criteria(&self, stanza: &Stanza) -> bool {
            matches!(stanza, Stanza::Iq(iq) if matches!(iq.payload, IqType::Get(_)))
        }
        fn process<'a>(
            &'a self,
            _stanza: Stanza,
        ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCondition>> + Send + 'a>> {
            Box::pin(async { Err(ErrorCondition::undefined_condition()) })
        }
    }

    struct RecordingTransport {
        sent: Mutex<Vec<Stanza>>,
    }

    impl Transport for RecordingTransport {
        fn state(&self) -> TransportState {
            TransportState::Connected
        }
        async fn send_stanza(&self, stanza: &Stanza) -> Result<(), crate::error::Error> {
            self.sent.lock().unwrap().push(stanza.clone());
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

    fn get_iq(id: &str) -> Stanza {
        let payload: xmpp_parsers::minidom::Element =
            "<ping xmlns='urn:xmpp:ping'/>".parse().unwrap();
        Stanza::Iq(Iq {
            from: Some(Jid::from(xmpp_parsers::jid::FullJid::new("bob@ex/res").unwrap())),
            to: None,
            id: id.to_string(),
            payload: IqType::Get(payload),
        })
    }

    #[tokio::test]
    async fn unclaimed_get_gets_feature_not_implemented_reply() {
        let registry = ModuleRegistryBuilder::new().build();
        let responses = ResponseManager::new();
        let transport = RecordingTransport {
            sent: Mutex::new(Vec::new()),
        };
        dispatch(&registry, &responses, &transport, get_iq("1")).await;
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Stanza::Iq(iq) => assert!(matches!(iq.payload, IqType::Error(_))),
            _ => panic!("expected iq"),
        }
    }

    #[tokio::test]
    async fn module_process_error_is_sent_back() {
        let registry = ModuleRegistryBuilder::new()
            .register(Arc::new(FailingModule))
            .build();
        let responses = ResponseManager::new();
        let transport = RecordingTransport {
            sent: Mutex::new(Vec::new()),
        };
        dispatch(&registry, &responses, &transport, get_iq("2")).await;
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Stanza::Iq(iq) => assert!(matches!(iq.payload, IqType::Error(_))),
            _ => panic!("expected iq"),
        }
    }

    #[tokio::test]
    async fn matched_response_is_not_routed_to_modules() {
        let registry = ModuleRegistryBuilder::new()
            .register(Arc::new(FailingModule))
            .build();
        let responses = ResponseManager::new();
        let rx = responses.register(None, "3".to_string(), std::time::Duration::from_secs(5));
        let transport = RecordingTransport {
            sent: Mutex::new(Vec::new()),
        };
        let result_iq = Stanza::Iq(Iq {
            from: None,
            to: None,
            id: "3".to_string(),
            payload: IqType::Result(None),
        });
        dispatch(&registry, &responses, &transport, result_iq).await;
        assert!(transport.sent.lock().unwrap().is_empty());
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn uncorrelated_iq_response_is_dropped_silently_not_routed() {
        let catch_all = Arc::new(CatchAllModule {
            calls: Mutex::new(0),
        });
        let registry = ModuleRegistryBuilder::new()
            .register(catch_all.clone())
            .build();
        let responses = ResponseManager::new();
        let transport = RecordingTransport {
            sent: Mutex::new(Vec::new()),
        };
        let stale_result = Stanza::Iq(Iq {
            from: None,
            to: None,
            id: "stale".to_string(),
            payload: IqType::Result(None),
        });
        dispatch(&registry, &responses, &transport, stale_result).await;
        assert_eq!(*catch_all.calls.lock().unwrap(), 0);
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
