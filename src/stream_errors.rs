// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream error parsing and `see-other-host` redirect handling (C8).
//!
//! Grounded on `DefinedCondition::SeeOtherHost` and the `StreamError`
//! struct (`parsers/src/stream_error.rs`); the reconnect/redirect caching
//! itself has no direct counterpart in the teacher's newer stanzastream
//! code (which discards SM state and disconnects unconditionally on any
//! stream error, see `negotiation.rs`'s `Disconnect` variant) and is
//! supplemented here per §4.4.

use xmpp_parsers::stream_error::{DefinedCondition, StreamError};

use crate::config::RedirectTarget;
use crate::error::ErrorCondition;

/// What to do with a received `<stream:error/>`, decided before the
/// negotiation reducer ever sees it.
#[derive(Debug, Clone)]
pub enum StreamErrorOutcome {
    /// A `see-other-host` redirect was parsed; cache it and reconnect.
    Redirect(RedirectTarget),
    /// Some other condition; forward to the negotiation reducer as
    /// [`crate::session::Input::StreamError`].
    Forward(Option<ErrorCondition>),
}

/// Parse a stream error and decide whether it is a redirect.
///
/// `current_direct_tls` should reflect whether the connection that
/// received this error was using direct TLS, since that property is
/// preserved across a `see-other-host` redirect (§4.4).
pub fn classify(error: &StreamError, current_direct_tls: bool) -> StreamErrorOutcome {
    match &error.condition {
        DefinedCondition::SeeOtherHost(location) => {
            match parse_see_other_host(location) {
                Some((host, port)) => {
                    log::debug!("see-other-host redirect to {}:{:?}", host, port);
                    StreamErrorOutcome::Redirect(RedirectTarget {
                        host,
                        port,
                        priority: None,
                        weight: None,
                        direct_tls: current_direct_tls,
                    })
                }
                None => {
                    log::warn!("malformed see-other-host location: {:?}", location);
                    StreamErrorOutcome::Forward(Some(ErrorCondition::Stream(
                        DefinedCondition::SeeOtherHost(location.clone()),
                    )))
                }
            }
        }
        other => {
            log::debug!("stream error received: {:?}", other);
            StreamErrorOutcome::Forward(Some(ErrorCondition::Stream(other.clone())))
        }
    }
}

/// Parse the `see-other-host` text content, which is `HOST` or
/// `HOST:PORT`. IPv6 literals are bracketed (`[::1]:5223`) per RFC 6120
/// §4.9.3.9.
fn parse_see_other_host(location: &str) -> Option<(String, Option<u16>)> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }

    if let Some(rest) = location.strip_prefix('[') {
        let (host, rest) = rest.split_once(']')?;
        let port = match rest.strip_prefix(':') {
            Some(port_str) => Some(port_str.parse().ok()?),
            None => None,
        };
        return Some((host.to_string(), port));
    }

    match location.rsplit_once(':') {
        Some((host, port_str)) if port_str.chars().all(|c| c.is_ascii_digit()) => {
            Some((host.to_string(), Some(port_str.parse().ok()?)))
        }
        _ => Some((location.to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_with(condition: DefinedCondition) -> StreamError {
        StreamError {
            condition,
            text: None,
            application_specific: Vec::new(),
        }
    }

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            parse_see_other_host("chat2.ex:5223"),
            Some(("chat2.ex".to_string(), Some(5223)))
        );
    }

    #[test]
    fn parses_host_only() {
        assert_eq!(
            parse_see_other_host("chat2.ex"),
            Some(("chat2.ex".to_string(), None))
        );
    }

    #[test]
    fn parses_bracketed_ipv6() {
        assert_eq!(
            parse_see_other_host("[::1]:5223"),
            Some(("::1".to_string(), Some(5223)))
        );
    }

    #[test]
    fn see_other_host_yields_redirect() {
        let error = error_with(DefinedCondition::SeeOtherHost("chat2.ex:5223".to_string()));
        match classify(&error, true) {
            StreamErrorOutcome::Redirect(target) => {
                assert_eq!(target.host, "chat2.ex");
                assert_eq!(target.port, Some(5223));
                assert!(target.direct_tls);
            }
            StreamErrorOutcome::Forward(_) => panic!("expected redirect"),
        }
    }

    #[test]
    fn other_condition_forwards() {
        let error = error_with(DefinedCondition::Conflict);
        assert!(matches!(
            classify(&error, false),
            StreamErrorOutcome::Forward(Some(_))
        ));
    }
}
