// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Transport connector contract (C1).
//!
//! Grounded on the `ServerConnector` trait (`connect/mod.rs`): RPITIT
//! (`impl Future<Output = ...> + Send`) rather than `async_trait`. Like
//! `ServerConnector`, this trait is generic-only (no `dyn Transport`); a
//! `SessionContext` is parameterized over one concrete transport type.
//! Everything below the framed channel (TCP, TLS, SRV resolution, XML
//! encoding) is an external collaborator; this crate only defines the
//! boundary it is driven through.

use std::future::Future;

use crate::config::RedirectTarget;
use crate::error::Error;
use crate::event::Stanza;

/// Socket-level state of the transport, distinct from the session-level
/// [`crate::state::SessionState`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No connection attempt in progress.
    Disconnected,
    /// A connection attempt (including SRV resolution, TCP connect, TLS
    /// handshake) is in progress.
    Connecting,
    /// A byte-oriented channel is open and stream negotiation may proceed.
    Connected,
}

/// Compression method negotiable via XEP-0138/0229. Only zlib is in use on
/// the modern network, but the type leaves room for none to be named
/// explicitly in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// `<method>zlib</method>`
    Zlib,
}

/// The bidirectional, framed transport a [`crate::context::SessionContext`]
/// is driven through.
///
/// Implementations own the TCP/TLS socket, SRV resolution and the XML
/// parser/serializer; all of that is out of scope for this crate (§1).
pub trait Transport: Send + Sync {
    /// Current socket-level state.
    fn state(&self) -> TransportState;

    /// Serialize and send a single stanza.
    fn send_stanza(&self, stanza: &Stanza) -> impl Future<Output = Result<(), Error>> + Send;

    /// Begin an inline TLS upgrade (STARTTLS). Resolves once the upgrade
    /// has completed; the caller still owes a stream restart afterwards.
    fn start_tls(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Begin stream compression. Resolves once the method is active; the
    /// caller still owes a stream restart afterwards.
    fn start_compression(
        &self,
        method: CompressionMethod,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Send a fresh `<stream:stream>` header over the existing channel,
    /// without establishing a new TCP/TLS connection.
    fn restart_stream(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Tear down the current channel and open a new one, optionally at a
    /// specific target (see §4.7 "Server-to-connect selection"). `None`
    /// means "let SRV resolution choose".
    fn reconnect_to(
        &self,
        target: Option<RedirectTarget>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Fall back to transport-level whitespace keepalive (§4.5), used when
    /// no ping module is registered.
    fn send_whitespace_keepalive(&self) -> impl Future<Output = Result<(), Error>> + Send;
}
