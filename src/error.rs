//! Error taxonomy surfaced by the broker client.

use std::time::Duration;

use thiserror::Error;

/// Failure to establish or authenticate the streaming channel.
///
/// Cloneable so it can be delivered both to the `connect` caller and to
/// `Error` event handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("failed to open stream {url}: {message}")]
    Open { url: String, message: String },

    #[error("timed out opening stream after {0:?}")]
    Timeout(Duration),

    #[error("failed to authenticate stream: {0}")]
    Auth(String),

    /// Error reply to a subscribe or unsubscribe request.
    #[error("stream request {id} rejected ({code}): {message}")]
    Rejected { id: u64, code: i64, message: String },

    #[error("connect aborted by disconnect")]
    Cancelled,
}

/// Coarse classification of an [`ExecutionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionFailure {
    NoPriceData,
    SubmissionFailed,
    Timeout,
    InvalidOrder,
}

/// Failure of a single `execute_order` call. Never retried internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("no price data for {symbol}: {detail}")]
    NoPriceData { symbol: String, detail: String },

    #[error("order submission failed{}: {message}", format_status(.status, .code))]
    SubmissionFailed {
        /// HTTP status, when the exchange answered
        status: Option<u16>,
        /// Exchange error code from the response body
        code: Option<i64>,
        message: String,
    },

    #[error("exchange request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

impl ExecutionError {
    pub fn reason(&self) -> ExecutionFailure {
        match self {
            ExecutionError::NoPriceData { .. } => ExecutionFailure::NoPriceData,
            ExecutionError::SubmissionFailed { .. } => ExecutionFailure::SubmissionFailed,
            ExecutionError::Timeout(_) => ExecutionFailure::Timeout,
            ExecutionError::InvalidOrder(_) => ExecutionFailure::InvalidOrder,
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        ExecutionError::SubmissionFailed {
            status: None,
            code: None,
            message: message.into(),
        }
    }
}

fn format_status(status: &Option<u16>, code: &Option<i64>) -> String {
    match (status, code) {
        (Some(s), Some(c)) => format!(" (HTTP {}, code {})", s, c),
        (Some(s), None) => format!(" (HTTP {})", s),
        (None, Some(c)) => format!(" (code {})", c),
        (None, None) => String::new(),
    }
}

/// Signer construction failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("API secret is empty")]
    EmptySecret,

    #[error("API secret is not a usable HMAC key")]
    InvalidKey,
}
