// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The six negotiation roles (§6 "Module contract").
//!
//! Every generic module implements [`crate::registry::Module`]; the roles
//! defined here are narrow traits a module may *additionally* implement so
//! that the negotiation reducer's driver (in [`crate::context`]) can reach
//! it by role rather than by scanning `criteria` predicates. `SessionContext`
//! holds at most one implementation of each role, each behind an
//! `Arc<dyn Role>`, so the methods return `Pin<Box<dyn Future>>` rather than
//! RPITIT (matching [`crate::registry::Module::process`] rather than
//! `ServerConnector`, since role handles need to be trait objects).

use std::future::Future;
use std::pin::Pin;

use xmpp_parsers::jid::FullJid;
use xmpp_parsers::stream_features::StreamFeatures;

use crate::error::SessionError;

type UnitFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// SASL authentication role.
pub trait AuthModule: Send + Sync {
    /// Attempt authentication against the mechanisms advertised in
    /// `features`. Completion is reported asynchronously via
    /// `SessionEvent::AuthSuccess`/`AuthFailed`/`AuthFinishExpected`, not
    /// through this future's result; the future only resolves once the
    /// initial auth request has been sent.
    fn login<'a>(&'a self, features: &'a StreamFeatures) -> UnitFuture<'a>;
}

/// Resource binding role.
pub trait BindModule: Send + Sync {
    /// Send a bind request. Resolves once the request has been sent;
    /// completion is reported via `ResourceBindSuccess`/`ResourceBindError`.
    fn bind(&self) -> UnitFuture<'_>;
}

/// Legacy (RFC 3921) session establishment role.
pub trait SessionEstablishModule: Send + Sync {
    /// Send the legacy `<session/>` IQ. Completion is reported via
    /// `SessionEstablishmentSuccess`/`SessionEstablishmentError`.
    fn establish(&self) -> UnitFuture<'_>;
}

/// XEP-0198 Stream Management role.
pub trait StreamManagementModule: Send + Sync {
    /// Attempt to resume a previous stream. Completion is reported via
    /// `SmResumed`/`SmFailed`.
    fn resume(&self) -> UnitFuture<'_>;

    /// Enable stream management on a freshly bound stream (no prior session
    /// to resume).
    fn enable(&self) -> UnitFuture<'_>;

    /// Whether this module wants to attempt pipelining for the current
    /// connection attempt. The reducer never forces pipelining on; it only
    /// asks.
    fn is_pipelining_active(&self) -> bool;

    /// Send the stream header for a pipelined connection attempt, used in
    /// place of a stream restart when pipelining is active.
    fn start_stream(&self) -> UnitFuture<'_>;

    /// A persisted resumption location (host, port, direct_tls), if this
    /// module is holding one from a prior session. Consulted by
    /// `server_to_connect_details` (§4.7) when no redirect is cached.
    fn resumption_location(&self) -> Option<(String, Option<u16>, bool)> {
        None
    }
}

/// Service discovery role, invoked best-effort once the session is
/// `Connected`.
pub trait DiscoModule: Send + Sync {
    /// Kick off a discovery query against the bound JID's server.
    fn discover<'a>(&'a self, bound_jid: &'a FullJid) -> UnitFuture<'a>;
}

/// XEP-0199 ping role, backing the keepalive scheduler (C9).
pub trait PingModule: Send + Sync {
    /// Send a ping to `target` and report the outcome.
    fn ping<'a>(
        &'a self,
        target: &'a FullJid,
    ) -> Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + 'a>>;
}
