//! WebSocket close codes and the reconnect policy attached to them.
//!
//! The room server closes connections with the standard RFC 6455 codes plus
//! two application codes in the 4000 range. Codes that signal a permanent
//! problem (auth failure, protocol violation) must never trigger an automatic
//! reconnect, since retrying would only repeat the same failure.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A WebSocket close code.
///
/// Stored as the raw `u16` so unknown codes from the server survive intact;
/// [`class`](CloseCode::class) maps them onto the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// 1000: normal closure.
    pub const NORMAL: Self = Self(1000);
    /// 1001: endpoint going away (page unload, server restart).
    pub const GOING_AWAY: Self = Self(1001);
    /// 1002: protocol error.
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// 1003: unsupported data.
    pub const UNSUPPORTED_DATA: Self = Self(1003);
    /// 1006: connection dropped without a close frame. Never sent on the wire.
    pub const ABNORMAL: Self = Self(1006);
    /// 1011: server hit an unexpected condition.
    pub const SERVER_ERROR: Self = Self(1011);
    /// 4000: application auth failure.
    pub const AUTH_FAILURE: Self = Self(4000);
    /// 4001: application invalid token.
    pub const INVALID_TOKEN: Self = Self(4001);

    /// Returns the reconnect class for this code.
    pub fn class(self) -> CloseClass {
        match self {
            Self::NORMAL => CloseClass::Normal,
            Self::PROTOCOL_ERROR | Self::UNSUPPORTED_DATA | Self::SERVER_ERROR => {
                CloseClass::Protocol
            }
            Self::AUTH_FAILURE | Self::INVALID_TOKEN => CloseClass::AuthFailure,
            _ => CloseClass::Abnormal,
        }
    }

    /// Returns `true` if a connection closed with this code should be retried.
    pub fn should_reconnect(self) -> bool {
        self.class() == CloseClass::Abnormal
    }

    /// Returns a short human-readable description of this code.
    pub fn description(self) -> &'static str {
        match self {
            Self::NORMAL => "normal closure",
            Self::GOING_AWAY => "endpoint going away",
            Self::PROTOCOL_ERROR => "protocol error",
            Self::UNSUPPORTED_DATA => "unsupported data",
            Self::ABNORMAL => "connection dropped",
            Self::SERVER_ERROR => "server error",
            Self::AUTH_FAILURE => "authentication failed",
            Self::INVALID_TOKEN => "invalid token",
            _ => "unrecognized close code",
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.description())
    }
}

/// How the session reacts to a close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Deliberate shutdown by either side. No reconnect.
    Normal,
    /// The peer considers the traffic invalid. No reconnect.
    Protocol,
    /// Credentials were rejected. No reconnect; surfaced to the user.
    AuthFailure,
    /// Anything else, including drops without a close frame. Reconnect.
    Abnormal,
}
