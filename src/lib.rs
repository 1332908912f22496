// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core session-logic engine for an [XMPP](https://xmpp.org/) client.
//!
//! This crate implements the part of an XMPP client that is independent of
//! any particular transport or XEP: the stream negotiation sequencer
//! (STARTTLS → compression → SASL → bind → session → stream management),
//! the inbound stanza dispatcher, the outbound filter pipeline, response
//! correlation and the feature-module contract.
//!
//! It deliberately does not implement TCP/TLS sockets, XML parsing, SASL
//! mechanisms or individual XEPs. Those are external collaborators reached
//! through the traits in [`transport`] and [`registry`].
//!
//! # Getting started
//!
//! Build a [`config::Config`], implement [`transport::Transport`] for your
//! byte-oriented connection, register your feature modules in a
//! [`registry::ModuleRegistry`], and drive a [`context::SessionContext`]
//! through its public API in [`context`].

#![deny(unsafe_code)]

pub use xmpp_parsers::{jid, minidom};
pub use xmpp_parsers as parsers;

pub mod bus;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod keepalive;
pub mod modules;
pub mod outbound;
pub mod registry;
pub mod response;
pub mod session;
pub mod state;
pub mod stream_errors;
pub mod transport;

pub use config::{Config, RedirectTarget};
pub use context::SessionContext;
pub use error::Error;
pub use event::{SessionEvent, Stanza};
pub use registry::{Module, ModuleId, ModuleRegistry};
pub use state::SessionState;
