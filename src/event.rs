// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stanza envelope and the events exposed on the [event bus](crate::bus).

use rand::{thread_rng, Rng};
use xmpp_parsers::{iq::Iq, jid::Jid, message::Message, presence::Presence};

use crate::config::RedirectTarget;
use crate::error::SessionError;
use crate::state::NegotiationPhase;

pub(crate) fn make_id() -> String {
    let id: u64 = thread_rng().gen();
    format!("{}", id)
}

/// A stanza sent or received over the stream.
///
/// This is the unit of work for the [dispatcher](crate::dispatcher) and the
/// [outbound pipeline](crate::outbound): the XML parser/serializer (out of
/// scope for this crate) is expected to produce and consume exactly this
/// type at its boundary with the core.
#[derive(Debug, Clone)]
pub enum Stanza {
    /// `<iq/>`
    Iq(Iq),
    /// `<message/>`
    Message(Message),
    /// `<presence/>`
    Presence(Presence),
}

impl Stanza {
    /// Assign a random ID to the stanza, if no ID has been assigned yet.
    pub fn ensure_id(&mut self) -> &str {
        match self {
            Self::Iq(iq) => {
                if iq.id.is_empty() {
                    iq.id = make_id();
                }
                &iq.id
            }
            Self::Message(message) => message.id.get_or_insert_with(make_id),
            Self::Presence(presence) => presence.id.get_or_insert_with(make_id),
        }
    }

    /// The stanza's `id` attribute, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Iq(iq) => Some(iq.id.as_str()).filter(|id| !id.is_empty()),
            Self::Message(message) => message.id.as_deref(),
            Self::Presence(presence) => presence.id.as_deref(),
        }
    }

    /// The stanza's `from` attribute, if any.
    pub fn from(&self) -> Option<&Jid> {
        match self {
            Self::Iq(iq) => iq.from.as_ref(),
            Self::Message(message) => message.from.as_ref(),
            Self::Presence(presence) => presence.from.as_ref(),
        }
    }

    /// `true` if this is an `<iq type="result"/>` or `<iq type="error"/>`.
    pub fn is_iq_response(&self) -> bool {
        matches!(self, Self::Iq(iq) if matches!(
            iq.payload,
            xmpp_parsers::iq::IqType::Result(_) | xmpp_parsers::iq::IqType::Error(_)
        ))
    }
}

impl From<Iq> for Stanza {
    fn from(other: Iq) -> Self {
        Self::Iq(other)
    }
}

impl From<Message> for Stanza {
    fn from(other: Message) -> Self {
        Self::Message(other)
    }
}

impl From<Presence> for Stanza {
    fn from(other: Presence) -> Self {
        Self::Presence(other)
    }
}

impl TryFrom<Stanza> for Iq {
    type Error = Stanza;

    fn try_from(other: Stanza) -> Result<Self, Self::Error> {
        match other {
            Stanza::Iq(st) => Ok(st),
            other => Err(other),
        }
    }
}

/// Events published on the [event bus](crate::bus) (§6 "Exposed events").
///
/// Subscribers (feature modules, the surrounding driver, UI code) receive
/// these in the order they were fired, on the session's task queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// `<stream:features/>` were received and the negotiation sequencer is
    /// about to react to them.
    StreamFeaturesReceived,
    /// SASL authentication succeeded.
    AuthSuccess,
    /// SASL authentication failed.
    AuthFailed,
    /// The auth module is pipelining and expects `start_stream` to be
    /// called instead of a stream restart.
    AuthFinishExpected,
    /// Resource binding succeeded; carries the bound full JID.
    ResourceBindSuccess(Jid),
    /// Resource binding failed.
    ResourceBindError,
    /// Legacy (RFC 3921) session establishment succeeded.
    SessionEstablishmentSuccess,
    /// Legacy session establishment failed.
    SessionEstablishmentError,
    /// Stream management resumption succeeded.
    SmResumed,
    /// Stream management resumption failed; a fresh bind will follow.
    SmFailed,
    /// The session was cleared (all pending responses failed, SM state
    /// reset).
    SessionCleared,
    /// A stream error was received and did not trigger a redirect; carries
    /// the parsed condition if one could be determined.
    ErrorEvent(Option<String>),
    /// A `see-other-host` redirect was cached.
    RedirectCached(RedirectTarget),
    /// Internal: negotiation phase changed. Mostly useful for tests and
    /// diagnostics.
    NegotiationPhaseChanged(NegotiationPhase),
    /// A feature module reported a session-level failure.
    ModuleError(SessionError),
}
