//! Error taxonomy for a request operation.
//!
//! # Design
//! Every failure is terminal and local: the operation records one
//! classification in the payload's error slot and completes. There is no
//! separate failure channel. `Cancelled` wins over anything else once a
//! cancel has been requested.

use std::fmt;

/// Coarse classification of a transport-layer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request did not complete within the configured timeout.
    Timeout,
    /// The host name could not be resolved.
    Dns,
    /// The connection could not be established or broke mid-transfer.
    Connection,
    /// The request could not be sent as described (bad URL, bad header).
    InvalidRequest,
    /// The response body exceeded the configured limit.
    BodyTooLarge,
    /// The transport handle no longer accepts work.
    Invalidated,
    /// The task was cancelled by its transport handle.
    Cancelled,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Connection => "connection",
            TransportErrorKind::InvalidRequest => "invalid request",
            TransportErrorKind::BodyTooLarge => "body too large",
            TransportErrorKind::Invalidated => "invalidated",
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// A lower-level connectivity or protocol failure, opaque to the operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalidated() -> Self {
        Self::new(
            TransportErrorKind::Invalidated,
            "transport no longer accepts new tasks",
        )
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "task cancelled by transport")
    }
}

fn classify(err: &ureq::Error) -> TransportErrorKind {
    match err {
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Io(_) => TransportErrorKind::Connection,
        ureq::Error::BadUri(_) | ureq::Error::Http(_) => TransportErrorKind::InvalidRequest,
        ureq::Error::BodyExceedsLimit(_) => TransportErrorKind::BodyTooLarge,
        _ => TransportErrorKind::Other,
    }
}

impl From<ureq::Error> for TransportError {
    fn from(err: ureq::Error) -> Self {
        TransportError::new(classify(&err), err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        // Body readers surface ureq failures wrapped in io::Error.
        let wrapped = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ureq::Error>())
            .map(classify);
        let kind = wrapped.unwrap_or(match err.kind() {
            std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            _ => TransportErrorKind::Connection,
        });
        TransportError::new(kind, err.to_string())
    }
}

/// Terminal classification stored in a payload's error slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// The transport failed before a complete response was received.
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    /// The transport succeeded but the body was empty and the method
    /// requires content.
    #[error("response body was empty")]
    EmptyBody,

    /// The operation was cancelled by explicit request.
    #[error("operation was cancelled")]
    Cancelled,
}

impl OperationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationError::Cancelled)
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            OperationError::Transport(e) => Some(e.kind),
            _ => None,
        }
    }
}
