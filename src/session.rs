// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The session negotiation sequencer (C7).
//!
//! Grounded on `NegotiationState`/`NegotiationResult` in
//! `stanzastream/negotiation.rs`: a state machine advanced by one event at
//! a time, structured as enum variants rather than a flag-driven `match`.
//! Unlike that code, [`Negotiator::react`] is a plain synchronous function
//! with no stream/sink access at all — it takes an [`Input`], returns a
//! `Vec<Output>`, and never touches I/O, the module registry or the event
//! bus directly. [`crate::context::SessionContext`] is the driver that
//! actually awaits transport operations and invokes modules in reaction to
//! these outputs; keeping the two separate is what makes this reducer
//! testable without a transport or an async runtime.

use xmpp_parsers::jid::FullJid;
use xmpp_parsers::stream_features::StreamFeatures;

use crate::config::Config;
use crate::error::ErrorCondition;
use crate::event::SessionEvent;
use crate::state::{NegotiationPhase, SessionState};
use crate::transport::{CompressionMethod, TransportState};

const COMPRESSION_FEATURE_NS: &str = "http://jabber.org/features/compress";
const LEGACY_SESSION_FEATURE_NS: &str = "urn:ietf:params:xml:ns:xmpp-session";

fn zlib_compression_advertised(features: &StreamFeatures) -> bool {
    features.others.iter().any(|el| {
        el.is("compression", COMPRESSION_FEATURE_NS)
            && el.children().any(|method| {
                method.name() == "method" && method.texts().any(|text| text == "zlib")
            })
    })
}

fn legacy_session_required(features: &StreamFeatures) -> bool {
    features
        .others
        .iter()
        .any(|el| el.is("session", LEGACY_SESSION_FEATURE_NS))
}

fn stream_management_advertised(features: &StreamFeatures) -> bool {
    features.stream_management.is_some()
}

/// Events the reducer reacts to (§4.1 "Contract").
#[derive(Debug, Clone)]
pub enum Input {
    /// The transport's socket-level state changed.
    TransportStateChanged(TransportState),
    /// `<stream:features/>` were received.
    StreamFeaturesReceived(StreamFeatures),
    /// The transport reported that the inline TLS upgrade requested via
    /// `Output::StartTls` has completed.
    TlsEstablished,
    /// The transport reported that compression requested via
    /// `Output::StartCompression` has been enabled.
    CompressionEstablished,
    /// SASL authentication succeeded.
    AuthSuccess,
    /// SASL authentication failed.
    AuthFailed,
    /// The auth module is pipelining; treat as equivalent to auth-success
    /// for stream-restart purposes (§4.1 "Tie-breaks").
    AuthFinishExpected,
    /// Resource binding succeeded.
    ResourceBound(FullJid),
    /// Resource binding failed.
    BindFailed,
    /// Legacy session establishment succeeded.
    SessionEstablished,
    /// Legacy session establishment failed.
    SessionErrorReported,
    /// Stream management resumption succeeded; carries the resumed JID
    /// (bind is skipped, so the reducer is never told it via
    /// `ResourceBound`).
    SmResumed(FullJid),
    /// Stream management resumption failed.
    SmFailed,
    /// A stream error arrived that [`crate::stream_errors`] did not resolve
    /// into a redirect. `None` if the condition could not be classified.
    StreamError(Option<ErrorCondition>),
    /// The stream was terminated (EOF, reset, or local close).
    StreamTerminated,
}

/// A negotiation role's method the driver should invoke in reaction to an
/// [`Output::InvokeModule`] (§6 "five well-known negotiation roles").
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleInvocation {
    /// Invoke the auth module's `login`.
    AuthLogin,
    /// Invoke the bind module's `bind`.
    Bind,
    /// Invoke the session-establishment module's `establish`.
    SessionEstablish,
    /// Invoke the stream-management module's `resume`.
    SmResume,
    /// Invoke the stream-management module's `enable`.
    SmEnable,
    /// Invoke the stream-management module's `start_stream` (pipelining).
    SmStartStream,
    /// Invoke the disco module's `discover` against the given full JID.
    DiscoDiscover(FullJid),
}

/// Actions the driver must perform in reaction to an [`Input`] (§4.1
/// "Contract"). Order matters: outputs are applied in sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Begin an inline TLS upgrade.
    StartTls,
    /// Begin stream compression.
    StartCompression(CompressionMethod),
    /// Send a fresh stream header over the existing channel.
    RestartStream,
    /// Invoke a negotiation role method.
    InvokeModule(ModuleInvocation),
    /// Publish a new observable session state.
    EmitState(SessionState),
    /// Publish an event on the event bus.
    FireEvent(SessionEvent),
}

/// The pure negotiation reducer.
///
/// Holds only the bookkeeping needed to decide what comes next: which
/// upgrades are already active, whether auth/bind/session/SM have
/// completed, and whether the connection attempt is a resumption.
#[derive(Debug, Clone)]
pub struct Negotiator {
    config: Config,
    phase: NegotiationPhase,
    tls_active: bool,
    compression_active: bool,
    authenticated: bool,
    auth_in_progress: bool,
    pipelining_active: bool,
    sm_attempt_resume: bool,
    sm_active: bool,
    sm_advertised: bool,
    legacy_session_required: bool,
    bound_jid: Option<FullJid>,
}

impl Negotiator {
    /// Create a fresh reducer. `resume_available` should be `true` when the
    /// caller holds persisted stream-management state it wants to try to
    /// resume on the next successful connection.
    pub fn new(config: Config, resume_available: bool) -> Self {
        Self {
            config,
            phase: NegotiationPhase::AwaitingFeatures,
            tls_active: false,
            compression_active: false,
            authenticated: false,
            auth_in_progress: false,
            pipelining_active: false,
            sm_attempt_resume: resume_available,
            sm_active: false,
            sm_advertised: false,
            legacy_session_required: false,
            bound_jid: None,
        }
    }

    /// Tell the reducer whether the stream-management module wants to
    /// pipeline this connection attempt (§6, `is_pipelining_active`). Must
    /// be called before the first `StreamFeaturesReceived`.
    pub fn set_pipelining_active(&mut self, active: bool) {
        self.pipelining_active = active;
    }

    /// Current negotiation phase, mostly useful for tests and diagnostics.
    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    /// The JID bound for the current connection, if negotiation has
    /// reached that point.
    pub fn bound_jid(&self) -> Option<&FullJid> {
        self.bound_jid.as_ref()
    }

    /// React to a single input, returning the actions the driver must take.
    pub fn react(&mut self, input: Input) -> Vec<Output> {
        match input {
            Input::TransportStateChanged(state) => self.on_transport_state(state),
            Input::StreamFeaturesReceived(features) => self.on_features(features),
            Input::TlsEstablished => {
                self.tls_active = true;
                self.phase = NegotiationPhase::AwaitingFeatures;
                log::debug!("STARTTLS complete, restarting stream");
                vec![Output::RestartStream]
            }
            Input::CompressionEstablished => {
                self.compression_active = true;
                self.phase = NegotiationPhase::AwaitingFeatures;
                log::debug!("compression enabled, restarting stream");
                vec![Output::RestartStream]
            }
            Input::AuthSuccess => self.on_auth_success(),
            Input::AuthFailed => {
                self.authenticated = false;
                self.auth_in_progress = false;
                self.phase = NegotiationPhase::Failed;
                log::warn!("authentication failed");
                vec![Output::FireEvent(SessionEvent::AuthFailed)]
            }
            Input::AuthFinishExpected => self.on_auth_finish_expected(),
            Input::ResourceBound(jid) => self.on_resource_bound(jid),
            Input::BindFailed => {
                self.phase = NegotiationPhase::Failed;
                log::warn!("resource binding failed");
                vec![Output::FireEvent(SessionEvent::ResourceBindError)]
            }
            Input::SessionEstablished => self.enter_connected(SessionEvent::SessionEstablishmentSuccess),
            Input::SessionErrorReported => {
                self.phase = NegotiationPhase::Failed;
                log::warn!("legacy session establishment failed");
                vec![Output::FireEvent(SessionEvent::SessionEstablishmentError)]
            }
            Input::SmResumed(jid) => {
                self.bound_jid = Some(jid);
                self.sm_active = true;
                self.enter_connected(SessionEvent::SmResumed)
            }
            Input::SmFailed => {
                log::debug!(
                    "stream management resumption failed, falling back to a fresh bind"
                );
                self.sm_attempt_resume = false;
                self.phase = NegotiationPhase::BindInProgress;
                vec![
                    Output::FireEvent(SessionEvent::SmFailed),
                    Output::InvokeModule(ModuleInvocation::Bind),
                ]
            }
            Input::StreamError(condition) => {
                self.phase = NegotiationPhase::Failed;
                let message = condition.as_ref().map(|c| c.to_string());
                log::warn!("stream error during negotiation: {:?}", message);
                vec![Output::FireEvent(SessionEvent::ErrorEvent(message))]
            }
            Input::StreamTerminated => {
                // Negotiation state for *this* connection is over; SM/auth
                // bookkeeping is deliberately left intact until the next
                // `Connecting` transition (see design notes in SPEC_FULL.md
                // §9a, "SM reset condition on stream termination").
                self.phase = NegotiationPhase::Failed;
                Vec::new()
            }
        }
    }

    fn on_transport_state(&mut self, state: TransportState) -> Vec<Output> {
        match state {
            TransportState::Connecting => {
                self.phase = NegotiationPhase::AwaitingFeatures;
                self.tls_active = false;
                self.compression_active = false;
                self.authenticated = false;
                self.auth_in_progress = false;
                self.sm_active = false;
                self.sm_advertised = false;
                self.legacy_session_required = false;
                self.bound_jid = None;
                vec![Output::EmitState(SessionState::Connecting)]
            }
            TransportState::Connected => Vec::new(),
            TransportState::Disconnected => vec![Output::EmitState(SessionState::Disconnected)],
        }
    }

    fn on_features(&mut self, features: StreamFeatures) -> Vec<Output> {
        if self.phase != NegotiationPhase::AwaitingFeatures {
            log::trace!("ignoring spurious stream features in phase {:?}", self.phase);
            return Vec::new();
        }

        let mut out = vec![Output::FireEvent(SessionEvent::StreamFeaturesReceived)];

        if !self.tls_active && !self.config.disable_tls && features.can_starttls() {
            self.phase = NegotiationPhase::StartTlsInProgress;
            out.push(Output::StartTls);
            return out;
        }

        if !self.compression_active
            && !self.config.disable_compression
            && zlib_compression_advertised(&features)
        {
            self.phase = NegotiationPhase::CompressionInProgress;
            out.push(Output::StartCompression(CompressionMethod::Zlib));
            return out;
        }

        self.sm_advertised = stream_management_advertised(&features);
        self.legacy_session_required = legacy_session_required(&features);

        if !self.authenticated {
            if self.auth_in_progress {
                // Re-entrant: features arrived again while auth was still
                // in flight. Fall through to the post-auth branch so we
                // don't send a second login request.
                if self.sm_attempt_resume && self.config.enable_stream_management && self.sm_advertised {
                    self.phase = NegotiationPhase::SmEnableInProgress;
                    out.push(Output::InvokeModule(ModuleInvocation::SmResume));
                } else {
                    self.phase = NegotiationPhase::BindInProgress;
                    out.push(Output::InvokeModule(ModuleInvocation::Bind));
                }
            } else {
                self.auth_in_progress = true;
                self.phase = NegotiationPhase::AuthInProgress;
                out.push(Output::InvokeModule(ModuleInvocation::AuthLogin));
            }
            return out;
        }

        if self.sm_attempt_resume && self.config.enable_stream_management && self.sm_advertised {
            self.phase = NegotiationPhase::SmEnableInProgress;
            out.push(Output::InvokeModule(ModuleInvocation::SmResume));
        } else {
            self.phase = NegotiationPhase::BindInProgress;
            out.push(Output::InvokeModule(ModuleInvocation::Bind));
        }
        out
    }

    fn on_auth_success(&mut self) -> Vec<Output> {
        self.authenticated = true;
        self.auth_in_progress = false;
        log::debug!("authentication succeeded");
        if self.pipelining_active {
            // Stream restart is deferred to `AuthFinishExpected` (§4.1
            // "Stream restart policy").
            vec![Output::FireEvent(SessionEvent::AuthSuccess)]
        } else {
            self.phase = NegotiationPhase::AwaitingFeatures;
            vec![
                Output::FireEvent(SessionEvent::AuthSuccess),
                Output::RestartStream,
            ]
        }
    }

    fn on_auth_finish_expected(&mut self) -> Vec<Output> {
        self.authenticated = true;
        self.auth_in_progress = false;
        self.phase = NegotiationPhase::AwaitingFeatures;
        vec![
            Output::FireEvent(SessionEvent::AuthFinishExpected),
            Output::InvokeModule(ModuleInvocation::SmStartStream),
        ]
    }

    fn on_resource_bound(&mut self, jid: FullJid) -> Vec<Output> {
        self.bound_jid = Some(jid.clone());
        let mut out = vec![Output::FireEvent(SessionEvent::ResourceBindSuccess(
            jid.into(),
        ))];
        if self.legacy_session_required {
            self.phase = NegotiationPhase::SessionInProgress;
            out.push(Output::InvokeModule(ModuleInvocation::SessionEstablish));
        } else {
            out.extend(self.enter_connected(SessionEvent::SessionEstablishmentSuccess));
        }
        out
    }

    /// Shared tail of the bind-success (no session required) and
    /// session-established/SM-resumed paths (§4.1 "SM branch").
    fn enter_connected(&mut self, completion_event: SessionEvent) -> Vec<Output> {
        self.phase = NegotiationPhase::Ready;
        let mut out = vec![
            Output::FireEvent(completion_event),
            Output::EmitState(SessionState::Connected),
        ];
        if let Some(jid) = self.bound_jid.clone() {
            out.push(Output::InvokeModule(ModuleInvocation::DiscoDiscover(jid)));
        }
        if self.config.enable_stream_management && self.sm_advertised && !self.sm_active {
            out.push(Output::InvokeModule(ModuleInvocation::SmEnable));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmpp_parsers::minidom::Element;

    fn jid(s: &str) -> FullJid {
        FullJid::new(s).unwrap()
    }

    fn parse_features(xml: &str) -> StreamFeatures {
        let elem: Element = xml.parse().unwrap();
        StreamFeatures::try_from(elem).unwrap()
    }

    fn features_with_starttls() -> StreamFeatures {
        parse_features(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
               <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>\
             </stream:features>",
        )
    }

    fn features_with_bind() -> StreamFeatures {
        parse_features(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
               <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
               <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                 <mechanism>PLAIN</mechanism>\
               </mechanisms>\
             </stream:features>",
        )
    }

    #[test]
    fn happy_path_no_sm() {
        let mut n = Negotiator::new(Config::default(), false);
        assert_eq!(
            n.react(Input::TransportStateChanged(TransportState::Connecting)),
            vec![Output::EmitState(SessionState::Connecting)]
        );

        let out = n.react(Input::StreamFeaturesReceived(features_with_starttls()));
        assert_eq!(
            out,
            vec![
                Output::FireEvent(SessionEvent::StreamFeaturesReceived),
                Output::StartTls,
            ]
        );
        let out = n.react(Input::TlsEstablished);
        assert_eq!(out, vec![Output::RestartStream]);

        let out = n.react(Input::StreamFeaturesReceived(features_with_bind()));
        assert!(matches!(
            out.as_slice(),
            [
                Output::FireEvent(SessionEvent::StreamFeaturesReceived),
                Output::InvokeModule(ModuleInvocation::AuthLogin),
            ]
        ));

        let out = n.react(Input::AuthSuccess);
        assert_eq!(
            out,
            vec![
                Output::FireEvent(SessionEvent::AuthSuccess),
                Output::RestartStream,
            ]
        );

        let out = n.react(Input::StreamFeaturesReceived(features_with_bind()));
        assert!(matches!(
            out.as_slice(),
            [
                Output::FireEvent(SessionEvent::StreamFeaturesReceived),
                Output::InvokeModule(ModuleInvocation::Bind),
            ]
        ));

        let out = n.react(Input::ResourceBound(jid("alice@ex/mobile")));
        assert_eq!(
            out,
            vec![
                Output::FireEvent(SessionEvent::ResourceBindSuccess(
                    jid("alice@ex/mobile").into()
                )),
                Output::FireEvent(SessionEvent::SessionEstablishmentSuccess),
                Output::EmitState(SessionState::Connected),
                Output::InvokeModule(ModuleInvocation::DiscoDiscover(jid("alice@ex/mobile"))),
            ]
        );
        assert_eq!(n.phase(), NegotiationPhase::Ready);
    }

    #[test]
    fn compression_enablement_restarts_stream_and_sets_flag() {
        let mut n = Negotiator::new(Config::default(), false);
        let mut features = features_with_starttls();
        features.starttls = None;
        n.tls_active = true;
        features.others.push(
            "<compression xmlns='http://jabber.org/features/compress'>\
               <method>zlib</method>\
             </compression>"
                .parse()
                .unwrap(),
        );
        let out = n.react(Input::StreamFeaturesReceived(features));
        assert_eq!(
            out,
            vec![
                Output::FireEvent(SessionEvent::StreamFeaturesReceived),
                Output::StartCompression(CompressionMethod::Zlib),
            ]
        );

        let out = n.react(Input::CompressionEstablished);
        assert_eq!(out, vec![Output::RestartStream]);
        assert_eq!(n.phase(), NegotiationPhase::AwaitingFeatures);
    }

    #[test]
    fn sm_resume_success_skips_bind() {
        let mut n = Negotiator::new(Config::default(), true);
        n.react(Input::TransportStateChanged(TransportState::Connecting));
        n.authenticated = true;
        n.phase = NegotiationPhase::AwaitingFeatures;
        let mut features = features_with_bind();
        features.starttls = None;
        let out = n.react(Input::StreamFeaturesReceived(features));
        assert!(out
            .iter()
            .any(|o| matches!(o, Output::InvokeModule(ModuleInvocation::SmResume))));

        let out = n.react(Input::SmResumed(jid("alice@ex/mobile")));
        assert!(out.contains(&Output::EmitState(SessionState::Connected)));
        assert_eq!(n.bound_jid(), Some(&jid("alice@ex/mobile")));
    }

    #[test]
    fn sm_resume_failure_falls_back_to_bind() {
        let mut n = Negotiator::new(Config::default(), true);
        let out = n.react(Input::SmFailed);
        assert_eq!(
            out,
            vec![
                Output::FireEvent(SessionEvent::SmFailed),
                Output::InvokeModule(ModuleInvocation::Bind),
            ]
        );
        assert_eq!(n.phase(), NegotiationPhase::BindInProgress);
    }

    #[test]
    fn stale_features_after_ready_are_ignored() {
        let mut n = Negotiator::new(Config::default(), false);
        n.phase = NegotiationPhase::Ready;
        let out = n.react(Input::StreamFeaturesReceived(features_with_bind()));
        assert!(out.is_empty());
    }

    #[test]
    fn auth_failure_marks_phase_failed_without_retry() {
        let mut n = Negotiator::new(Config::default(), false);
        let out = n.react(Input::AuthFailed);
        assert_eq!(out, vec![Output::FireEvent(SessionEvent::AuthFailed)]);
        assert_eq!(n.phase(), NegotiationPhase::Failed);
    }

    #[test]
    fn pipelining_defers_restart_to_auth_finish_expected() {
        let mut n = Negotiator::new(Config::default(), false);
        n.set_pipelining_active(true);
        let out = n.react(Input::AuthSuccess);
        assert_eq!(out, vec![Output::FireEvent(SessionEvent::AuthSuccess)]);

        let out = n.react(Input::AuthFinishExpected);
        assert_eq!(
            out,
            vec![
                Output::FireEvent(SessionEvent::AuthFinishExpected),
                Output::InvokeModule(ModuleInvocation::SmStartStream),
            ]
        );
    }
}
