// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error taxonomy for the session engine (see [`crate` docs][`crate`]).
//!
//! Mirrors the split used by the rest of the ecosystem this crate is cut
//! from: a top-level [`Error`] with focused sub-enums, all with hand-written
//! `Display`/`std::error::Error` impls rather than a derive-macro crate.

use std::error::Error as StdError;
use std::fmt;

use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};
use xmpp_parsers::stream_error::DefinedCondition as StreamDefinedCondition;

/// Top-level error type.
#[derive(Debug)]
pub enum Error {
    /// A recognized stanza-level error condition, either received or about
    /// to be synthesized as a reply.
    Protocol(ErrorCondition),
    /// Authentication, bind or session-establishment failure reported by a
    /// feature module.
    Session(SessionError),
    /// The session was torn down (teardown, disconnect) while an operation
    /// was still pending.
    SessionTerminated,
    /// A response was not received within its deadline.
    Timeout,
    /// Should never happen; indicates a bug in the driving code.
    InvalidState,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
            Error::Session(e) => write!(f, "session error: {}", e),
            Error::SessionTerminated => write!(f, "session terminated"),
            Error::Timeout => write!(f, "response timed out"),
            Error::InvalidState => write!(f, "invalid state"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Protocol(e) => Some(e),
            Error::Session(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ErrorCondition> for Error {
    fn from(e: ErrorCondition) -> Self {
        Error::Protocol(e)
    }
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Error::Session(e)
    }
}

/// A recognized stream- or stanza-level error condition (§7 of the
/// specification this engine implements).
///
/// This is a thin wrapper that remembers whether the condition came from a
/// `<stream:error/>` or a stanza-level `<error/>`, since the two share a
/// defined-condition vocabulary but are serialized differently.
#[derive(Debug, Clone)]
pub enum ErrorCondition {
    /// Stanza-level error condition (`feature-not-implemented`,
    /// `service-unavailable`, ...).
    Stanza(DefinedCondition),
    /// Stream-level error condition, e.g. from a received
    /// `<stream:error/>`.
    Stream(StreamDefinedCondition),
}

impl ErrorCondition {
    /// The `feature-not-implemented` condition, used by the dispatcher when
    /// no module claims a stanza.
    pub fn feature_not_implemented() -> Self {
        ErrorCondition::Stanza(DefinedCondition::FeatureNotImplemented)
    }

    /// The `undefined-condition` fallback used for unrecognized internal
    /// faults raised by a module's `process`.
    pub fn undefined_condition() -> Self {
        ErrorCondition::Stanza(DefinedCondition::UndefinedCondition)
    }

    /// Build a `StanzaError` suitable for an IQ error reply.
    pub fn to_stanza_error(&self, error_type: ErrorType) -> StanzaError {
        match self {
            ErrorCondition::Stanza(condition) => StanzaError {
                type_: error_type,
                by: None,
                defined_condition: condition.clone(),
                texts: Default::default(),
                other: None,
            },
            ErrorCondition::Stream(_) => StanzaError {
                type_: error_type,
                by: None,
                defined_condition: DefinedCondition::UndefinedCondition,
                texts: Default::default(),
                other: None,
            },
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorCondition::Stanza(c) => write!(f, "{:?}", c),
            ErrorCondition::Stream(c) => write!(f, "{:?}", c),
        }
    }
}

impl StdError for ErrorCondition {}

/// Session-level failures reported by feature modules via events.
///
/// These are never locally recovered by the core (§7): they are surfaced on
/// the event bus, and tearing the session down is the surrounding driver's
/// decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// SASL authentication failed.
    AuthFailed,
    /// Resource binding failed.
    BindFailed,
    /// Legacy session establishment (RFC 3921) failed.
    SessionEstablishmentFailed,
    /// Stream management resumption failed (not itself fatal; the core
    /// falls back to a fresh bind).
    SmResumeFailed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionError::AuthFailed => write!(f, "authentication failed"),
            SessionError::BindFailed => write!(f, "resource binding failed"),
            SessionError::SessionEstablishmentFailed => {
                write!(f, "session establishment failed")
            }
            SessionError::SmResumeFailed => write!(f, "stream management resumption failed"),
        }
    }
}

impl StdError for SessionError {}
