// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration surface (§6) and the cached `see-other-host` redirect
//! record (§3, §4.4).

use core::time::Duration;

/// Configuration recognized by the session engine (§6).
///
/// Built with a chained builder, matching the `Timeouts`/`ClientBuilder`
/// idiom used elsewhere in this codebase. Loading these values from a file
/// or environment is a caller concern; this crate only defines the typed
/// surface.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Skip STARTTLS even if advertised.
    pub disable_tls: bool,
    /// Skip zlib compression even if advertised.
    pub disable_compression: bool,
    /// Include `from` in the initial stream header to enable server-side
    /// redirect by bare JID.
    pub use_see_other_host: bool,
    /// Attempt XEP-0198 enable/resume when advertised.
    pub enable_stream_management: bool,
    /// Keepalive period.
    pub ping_interval: Duration,
    /// Default response deadline for the response manager.
    pub request_timeout: Duration,
    /// Whether the surrounding driver should reconnect automatically on
    /// transport loss.
    pub reconnect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            disable_tls: false,
            disable_compression: false,
            use_see_other_host: false,
            enable_stream_management: true,
            ping_interval: Duration::new(60, 0),
            request_timeout: Duration::new(30, 0),
            reconnect: false,
        }
    }
}

impl Config {
    /// Start building a config from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip STARTTLS even if advertised.
    pub fn disable_tls(mut self, value: bool) -> Self {
        self.disable_tls = value;
        self
    }

    /// Skip zlib compression even if advertised.
    pub fn disable_compression(mut self, value: bool) -> Self {
        self.disable_compression = value;
        self
    }

    /// Include `from` in the initial stream header (enables server-side
    /// `see-other-host` redirect by bare JID).
    pub fn use_see_other_host(mut self, value: bool) -> Self {
        self.use_see_other_host = value;
        self
    }

    /// Attempt XEP-0198 enable/resume when advertised.
    pub fn enable_stream_management(mut self, value: bool) -> Self {
        self.enable_stream_management = value;
        self
    }

    /// Set the keepalive period.
    pub fn ping_interval(mut self, value: Duration) -> Self {
        self.ping_interval = value;
        self
    }

    /// Set the default response deadline.
    pub fn request_timeout(mut self, value: Duration) -> Self {
        self.request_timeout = value;
        self
    }

    /// Whether to reconnect automatically on transport loss.
    pub fn reconnect(mut self, value: bool) -> Self {
        self.reconnect = value;
        self
    }
}

/// A server record cached after a `see-other-host` stream error (§3, §4.4,
/// §4.7), consulted on the next connect attempt and cleared after use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    /// Target host.
    pub host: String,
    /// Target port, if one was specified in the redirect.
    pub port: Option<u16>,
    /// DNS SRV priority, if known.
    pub priority: Option<u16>,
    /// DNS SRV weight, if known.
    pub weight: Option<u16>,
    /// Whether the current connection was using direct TLS (preserved
    /// across the redirect).
    pub direct_tls: bool,
}
