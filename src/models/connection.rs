//! Streaming connection lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the client's single streaming channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
        };
        f.write_str(s)
    }
}

/// Why a streaming session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Peer sent a close frame
    Closed { code: u16, reason: String },
    /// Stream ended without a close frame
    EndOfStream,
    /// Read or write failure on the socket
    Transport(String),
    /// Caller asked to disconnect
    Requested,
    /// Automatic reconnection gave up
    ReconnectExhausted { attempts: u32 },
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed { code, reason } if reason.is_empty() => {
                write!(f, "closed by peer ({})", code)
            }
            DisconnectReason::Closed { code, reason } => {
                write!(f, "closed by peer ({}: {})", code, reason)
            }
            DisconnectReason::EndOfStream => f.write_str("stream ended"),
            DisconnectReason::Transport(msg) => write!(f, "transport error: {}", msg),
            DisconnectReason::Requested => f.write_str("disconnect requested"),
            DisconnectReason::ReconnectExhausted { attempts } => {
                write!(f, "gave up after {} reconnect attempts", attempts)
            }
        }
    }
}
