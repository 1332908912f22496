// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Public API surface and concurrency driver (C10, §5).
//!
//! Grounded on the `StanzaStreamWorker`-behind-a-frontend shape used for
//! the teacher's stanza stream: a single `tokio::spawn`-ed loop owns every
//! piece of mutable session state (the [`crate::session::Negotiator`], the
//! response manager, the redirect cache), and every public method on
//! [`SessionContext`] is an `async fn` that sends a message over a
//! `tokio::sync::mpsc` channel and, where a reply is needed, awaits a
//! `tokio::sync::oneshot`. This keeps every invariant in §3 ("exactly one
//! stanza to at most one consumer", "the response table is empty whenever
//! session state is Disconnected") enforced by construction: nothing
//! outside the loop ever touches the state directly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use xmpp_parsers::jid::{FullJid, Jid};
use xmpp_parsers::stream_error::StreamError;
use xmpp_parsers::stream_features::StreamFeatures;

use crate::bus::EventBus;
use crate::config::{Config, RedirectTarget};
use crate::dispatcher;
use crate::keepalive::KeepaliveScheduler;
use crate::modules::{
    AuthModule, BindModule, DiscoModule, PingModule, SessionEstablishModule,
    StreamManagementModule,
};
use crate::outbound;
use crate::registry::ModuleRegistry;
use crate::response::ResponseManager;
use crate::session::{Input, ModuleInvocation, Negotiator, Output};
use crate::state::{PublishedState, SessionState};
use crate::transport::{Transport, TransportState};

/// The set of negotiation-role modules a [`SessionContext`] can dispatch
/// to by role (§6 "five well-known negotiation roles" plus ping).
///
/// Every field is optional: a session with no registered auth module
/// simply never negotiates past `AwaitingFeatures`, which is a
/// configuration error on the caller's part rather than something this
/// crate can detect ahead of time.
#[derive(Default, Clone)]
pub struct Roles {
    pub auth: Option<Arc<dyn AuthModule>>,
    pub bind: Option<Arc<dyn BindModule>>,
    pub session_establish: Option<Arc<dyn SessionEstablishModule>>,
    pub stream_management: Option<Arc<dyn StreamManagementModule>>,
    pub disco: Option<Arc<dyn DiscoModule>>,
    pub ping: Option<Arc<dyn PingModule>>,
}

enum Command {
    StartStream,
    ReceivedIncoming(crate::event::Stanza),
    SendingOutgoing(crate::event::Stanza, oneshot::Sender<Result<(), crate::error::Error>>),
    TransportStateChanged(TransportState),
    FeaturesReceived(StreamFeatures),
    AuthSuccess,
    AuthFailed,
    AuthFinishExpected,
    ResourceBound(FullJid),
    BindFailed,
    SessionEstablished,
    SessionErrorReported,
    SmResumed(FullJid),
    SmFailed,
    StreamErrorReceived(StreamError),
    StreamTerminated,
    Keepalive,
    Unbind(oneshot::Sender<()>),
    ServerToConnectDetails(oneshot::Sender<Option<RedirectTarget>>),
    RegisterResponse {
        from: Option<Jid>,
        id: String,
        timeout: Option<Duration>,
        reply: oneshot::Sender<oneshot::Receiver<Result<crate::event::Stanza, crate::error::Error>>>,
    },
}

/// One logical account connection (§3 "Session Context").
///
/// Cheap to clone: every clone is a handle to the same background loop,
/// reached through an `mpsc::Sender`. Not generic over the transport type:
/// that only matters at [`SessionContext::bind`] time, when the driving
/// task is spawned.
#[derive(Clone)]
pub struct SessionContext {
    tx: mpsc::Sender<Command>,
    bare_jid: Jid,
    state: Arc<PublishedState>,
    bus: EventBus,
}

struct Worker<T: Transport> {
    config: Config,
    registry: Arc<ModuleRegistry>,
    bus: EventBus,
    transport: Arc<T>,
    responses: Arc<ResponseManager>,
    state: Arc<PublishedState>,
    roles: Roles,
    negotiator: Negotiator,
    redirect: Option<RedirectTarget>,
    direct_tls: bool,
    last_features: Option<StreamFeatures>,
}

impl SessionContext {
    /// Build a new session context and spawn its driving task.
    ///
    /// `resume_available` should reflect whether the caller holds a
    /// persisted XEP-0198 resumption id it wants the negotiator to try on
    /// the first successful connection (§3 "Pending Response Entry" /
    /// §4.7).
    pub fn bind<T: Transport + 'static>(
        bare_jid: Jid,
        config: Config,
        registry: Arc<ModuleRegistry>,
        transport: Arc<T>,
        roles: Roles,
        resume_available: bool,
    ) -> Self {
        let bus = EventBus::new();
        let state = Arc::new(PublishedState::new());
        let responses = Arc::new(ResponseManager::new());
        let mut negotiator = Negotiator::new(config, resume_available);
        if let Some(sm) = &roles.stream_management {
            negotiator.set_pipelining_active(sm.is_pipelining_active());
        }
        let (tx, rx) = mpsc::channel(256);

        let worker = Worker {
            config,
            registry,
            bus: bus.clone(),
            transport,
            responses,
            state: Arc::clone(&state),
            roles,
            negotiator,
            redirect: None,
            direct_tls: false,
            last_features: None,
        };
        tokio::spawn(worker.run(rx));

        Self {
            tx,
            bare_jid,
            state,
            bus,
        }
    }

    /// The session's own bare identity.
    pub fn bare_jid(&self) -> &Jid {
        &self.bare_jid
    }

    /// Current observable session state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Subscribe to session state changes.
    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Subscribe to the event bus.
    pub fn subscribe_events(&self) -> crate::bus::EventSubscription {
        self.bus.subscribe()
    }

    /// Tear the session down: fail all pending responses, reset all
    /// modules, and set state to `Disconnecting` then `Disconnected`
    /// (§4.6).
    pub async fn unbind(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Unbind(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Tell the session a fresh `<stream:stream>` has been (re)established
    /// and it should expect features next.
    pub async fn start_stream(&self) {
        let _ = self.tx.send(Command::StartStream).await;
    }

    /// Feed a parsed inbound stanza into the dispatcher (C5).
    pub async fn received_incoming(&self, stanza: crate::event::Stanza) {
        let _ = self.tx.send(Command::ReceivedIncoming(stanza)).await;
    }

    /// Run an outbound stanza through the outbound pipeline (C6) and
    /// deliver it to the transport.
    pub async fn sending_outgoing(
        &self,
        stanza: crate::event::Stanza,
    ) -> Result<(), crate::error::Error> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::SendingOutgoing(stanza, tx))
            .await
            .map_err(|_| crate::error::Error::SessionTerminated)?;
        rx.await.map_err(|_| crate::error::Error::SessionTerminated)?
    }

    /// Report a transport-level socket state change (§4.1's
    /// `TransportStateChanged`).
    pub async fn on_transport_state_changed(&self, state: TransportState) {
        let _ = self.tx.send(Command::TransportStateChanged(state)).await;
    }

    /// Feed received `<stream:features/>` to the negotiation reducer.
    pub async fn on_features_received(&self, features: StreamFeatures) {
        let _ = self.tx.send(Command::FeaturesReceived(features)).await;
    }

    /// Report that SASL authentication succeeded.
    pub async fn on_auth_success(&self) {
        let _ = self.tx.send(Command::AuthSuccess).await;
    }

    /// Report that SASL authentication failed.
    pub async fn on_auth_failed(&self) {
        let _ = self.tx.send(Command::AuthFailed).await;
    }

    /// Report that the auth module finished pipelined and expects
    /// `start_stream` instead of a restart.
    pub async fn on_auth_finish_expected(&self) {
        let _ = self.tx.send(Command::AuthFinishExpected).await;
    }

    /// Report that resource binding succeeded with the given full JID.
    pub async fn on_resource_bound(&self, jid: FullJid) {
        let _ = self.tx.send(Command::ResourceBound(jid)).await;
    }

    /// Report that resource binding failed.
    pub async fn on_bind_failed(&self) {
        let _ = self.tx.send(Command::BindFailed).await;
    }

    /// Report that legacy (RFC 3921) session establishment succeeded.
    pub async fn on_session_established(&self) {
        let _ = self.tx.send(Command::SessionEstablished).await;
    }

    /// Report that legacy session establishment failed.
    pub async fn on_session_error(&self) {
        let _ = self.tx.send(Command::SessionErrorReported).await;
    }

    /// Report that XEP-0198 resumption succeeded with the given JID.
    pub async fn on_sm_resumed(&self, jid: FullJid) {
        let _ = self.tx.send(Command::SmResumed(jid)).await;
    }

    /// Report that XEP-0198 resumption failed.
    pub async fn on_sm_failed(&self) {
        let _ = self.tx.send(Command::SmFailed).await;
    }

    /// Feed a received `<stream:error/>` to the stream-error handler (C8).
    pub async fn on_stream_error(&self, error: StreamError) {
        let _ = self.tx.send(Command::StreamErrorReceived(error)).await;
    }

    /// Report that the underlying stream was terminated.
    pub async fn on_stream_terminate(&self) {
        let _ = self.tx.send(Command::StreamTerminated).await;
    }

    /// Request that the session be gracefully closed, draining any
    /// in-flight dispatch first (§4.6).
    pub async fn on_stream_close(&self) {
        self.unbind().await;
    }

    /// Run one keepalive tick (§4.5), to be called on a
    /// `tokio::time::interval` at `Config::ping_interval`.
    pub async fn keepalive(&self) {
        let _ = self.tx.send(Command::Keepalive).await;
    }

    /// Register interest in the response to an outbound request (C3),
    /// using `Config::request_timeout` as the deadline unless `timeout`
    /// overrides it. Intended for feature modules that need request/reply
    /// correlation without re-implementing the response table themselves.
    pub async fn register_response(
        &self,
        from: Option<Jid>,
        id: String,
        timeout: Option<Duration>,
    ) -> oneshot::Receiver<Result<crate::event::Stanza, crate::error::Error>> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::RegisterResponse {
                from,
                id,
                timeout,
                reply: tx,
            })
            .await
            .is_err()
        {
            let (immediate_tx, immediate_rx) = oneshot::channel();
            let _ = immediate_tx.send(Err(crate::error::Error::SessionTerminated));
            return immediate_rx;
        }
        rx.await.unwrap_or_else(|_| {
            let (immediate_tx, immediate_rx) = oneshot::channel();
            let _ = immediate_tx.send(Err(crate::error::Error::SessionTerminated));
            immediate_rx
        })
    }

    /// The server to connect to on the next attempt, in priority order:
    /// cached redirect, then (caller-supplied) SM resumption location,
    /// then `None` (§4.7).
    pub async fn server_to_connect_details(&self) -> Option<RedirectTarget> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::ServerToConnectDetails(tx)).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }
}

impl<T: Transport + 'static> Worker<T> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let keepalive = KeepaliveScheduler::new(Arc::clone(&self.transport), self.roles.ping.clone());
        while let Some(command) = rx.recv().await {
            match command {
                Command::StartStream => {
                    self.registry.notify_stream_started();
                }
                Command::ReceivedIncoming(stanza) => {
                    dispatcher::dispatch(&self.registry, &self.responses, self.transport.as_ref(), stanza)
                        .await;
                }
                Command::SendingOutgoing(stanza, reply) => {
                    let result =
                        outbound::send(&self.registry, self.transport.as_ref(), stanza).await;
                    let _ = reply.send(result);
                }
                Command::TransportStateChanged(t_state) => {
                    if t_state == TransportState::Connecting {
                        if let Some(sm) = &self.roles.stream_management {
                            self.negotiator.set_pipelining_active(sm.is_pipelining_active());
                        }
                    }
                    self.react_and_apply(Input::TransportStateChanged(t_state)).await;
                }
                Command::FeaturesReceived(features) => {
                    self.last_features = Some(features.clone());
                    self.react_and_apply(Input::StreamFeaturesReceived(features)).await;
                }
                Command::AuthSuccess => {
                    self.react_and_apply(Input::AuthSuccess).await;
                }
                Command::AuthFailed => {
                    self.react_and_apply(Input::AuthFailed).await;
                }
                Command::AuthFinishExpected => {
                    self.react_and_apply(Input::AuthFinishExpected).await;
                }
                Command::ResourceBound(jid) => {
                    self.react_and_apply(Input::ResourceBound(jid)).await;
                }
                Command::BindFailed => {
                    self.react_and_apply(Input::BindFailed).await;
                }
                Command::SessionEstablished => {
                    self.react_and_apply(Input::SessionEstablished).await;
                }
                Command::SessionErrorReported => {
                    self.react_and_apply(Input::SessionErrorReported).await;
                }
                Command::SmResumed(jid) => {
                    self.react_and_apply(Input::SmResumed(jid)).await;
                    self.registry.notify_connection_restarted();
                }
                Command::SmFailed => {
                    self.react_and_apply(Input::SmFailed).await;
                }
                Command::StreamErrorReceived(error) => {
                    self.handle_stream_error(error).await;
                }
                Command::StreamTerminated => {
                    self.react_and_apply(Input::StreamTerminated).await;
                }
                Command::Keepalive => {
                    if let Some(jid) = self.negotiator.bound_jid().cloned() {
                        keepalive.tick(&jid).await;
                    }
                }
                Command::Unbind(reply) => {
                    self.teardown().await;
                    let _ = reply.send(());
                }
                Command::ServerToConnectDetails(reply) => {
                    let details = self.redirect.clone().or_else(|| {
                        self.roles
                            .stream_management
                            .as_ref()
                            .and_then(|sm| sm.resumption_location())
                            .map(|(host, port, direct_tls)| RedirectTarget {
                                host,
                                port,
                                priority: None,
                                weight: None,
                                direct_tls,
                            })
                    });
                    let _ = reply.send(details);
                }
                Command::RegisterResponse {
                    from,
                    id,
                    timeout,
                    reply,
                } => {
                    let deadline = timeout.unwrap_or(self.config.request_timeout);
                    let rx = self.responses.register(from, id, deadline);
                    let _ = reply.send(rx);
                }
            }
        }
    }

    async fn react_and_apply(&mut self, input: Input) {
        let outputs = self.negotiator.react(input);
        self.apply_outputs(outputs).await;
    }

    async fn handle_stream_error(&mut self, error: StreamError) {
        match crate::stream_errors::classify(&error, self.direct_tls) {
            crate::stream_errors::StreamErrorOutcome::Redirect(target) => {
                self.redirect = Some(target.clone());
                self.bus.publish(crate::event::SessionEvent::RedirectCached(target.clone()));
                if let Some(sm) = &self.roles.stream_management {
                    if sm.is_pipelining_active() {
                        log::debug!("notifying pipelining module of pending restart");
                    }
                }
                let _ = self.transport.reconnect_to(Some(target)).await;
            }
            crate::stream_errors::StreamErrorOutcome::Forward(condition) => {
                let outputs = self.negotiator.react(Input::StreamError(condition));
                self.apply_outputs(outputs).await;
            }
        }
    }

    async fn teardown(&mut self) {
        if !self.state.set(SessionState::Disconnecting) {
            log::debug!("teardown requested from a state that cannot reach Disconnecting");
        }
        self.responses.clear();
        self.registry.notify_reset();
        self.bus.publish(crate::event::SessionEvent::SessionCleared);
        self.state.set(SessionState::Disconnected);
    }

    /// Drains `outputs` in order, feeding transport-reported STARTTLS/
    /// compression success back into the reducer as the follow-up `Input`
    /// it expects (§4.1) and queuing whatever that reaction yields (always
    /// at least `Output::RestartStream`) for processing in the same pass.
    /// A plain `Vec` loop can't do this without recursive `async fn` calls,
    /// which Rust rejects, so a work queue stands in for the call stack.
    async fn apply_outputs(&mut self, outputs: Vec<Output>) {
        let mut queue: VecDeque<Output> = outputs.into();
        while let Some(output) = queue.pop_front() {
            match output {
                Output::StartTls => match self.transport.start_tls().await {
                    Ok(()) => queue.extend(self.negotiator.react(Input::TlsEstablished)),
                    Err(e) => log::warn!("STARTTLS failed: {}", e),
                },
                Output::StartCompression(method) => match self
                    .transport
                    .start_compression(method)
                    .await
                {
                    Ok(()) => queue.extend(self.negotiator.react(Input::CompressionEstablished)),
                    Err(e) => log::warn!("compression negotiation failed: {}", e),
                },
                Output::RestartStream => match self.transport.restart_stream().await {
                    Ok(()) => self.registry.notify_connection_restarted(),
                    Err(e) => log::warn!("stream restart failed: {}", e),
                },
                Output::InvokeModule(invocation) => self.invoke_module(invocation).await,
                Output::EmitState(state) => {
                    self.state.set(state);
                }
                Output::FireEvent(event) => {
                    self.bus.publish(event);
                }
            }
        }
    }

    async fn invoke_module(&mut self, invocation: ModuleInvocation) {
        match invocation {
            ModuleInvocation::AuthLogin => {
                if let (Some(auth), Some(features)) = (&self.roles.auth, &self.last_features) {
                    auth.login(features).await;
                } else {
                    log::error!("no auth module registered, negotiation cannot proceed");
                }
            }
            ModuleInvocation::Bind => {
                if let Some(bind) = &self.roles.bind {
                    bind.bind().await;
                } else {
                    log::error!("no bind module registered, negotiation cannot proceed");
                }
            }
            ModuleInvocation::SessionEstablish => {
                if let Some(session) = &self.roles.session_establish {
                    session.establish().await;
                } else {
                    log::error!("no session-establishment module registered");
                }
            }
            ModuleInvocation::SmResume => {
                if let Some(sm) = &self.roles.stream_management {
                    sm.resume().await;
                } else {
                    log::error!("no stream-management module registered");
                }
            }
            ModuleInvocation::SmEnable => {
                if let Some(sm) = &self.roles.stream_management {
                    sm.enable().await;
                }
            }
            ModuleInvocation::SmStartStream => {
                if let Some(sm) = &self.roles.stream_management {
                    sm.start_stream().await;
                }
            }
            ModuleInvocation::DiscoDiscover(jid) => {
                if let Some(disco) = &self.roles.disco {
                    disco.discover(&jid).await;
                }
            }
        }
    }
}

/// Default keepalive interval exposed for callers wiring a
/// `tokio::time::interval` driving [`SessionContext::keepalive`].
pub const DEFAULT_PING_INTERVAL: Duration = crate::keepalive::DEFAULT_PING_INTERVAL;
