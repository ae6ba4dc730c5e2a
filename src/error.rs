//! Error types for the chat relay
//!
//! Defines codec-level, routing-level, and server-level errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::UserId;

/// Wire codec errors
///
/// Covers framing failures, malformed JSON, and the explicit
/// unknown-tag case that sessions surface as a protocol error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Clean end of stream at a record boundary
    #[error("end of stream")]
    Eof,

    /// Stream ended between a metadata record and its payload
    #[error("stream ended mid-exchange")]
    Truncated,

    /// Record length prefix exceeds the framing limit
    #[error("record of {len} bytes exceeds the maximum record length")]
    RecordTooLarge { len: usize },

    /// Metadata named an event tag this peer does not understand
    #[error("unknown event tag '{0}'")]
    UnknownTag(String),

    /// JSON serialization/deserialization error
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error on the underlying stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors delivering a single event to one recipient's outbound queue
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The bounded delivery attempt ran out of time (queue full)
    #[error("delivery timed out")]
    Timeout,

    /// The recipient's session has gone away
    #[error("recipient connection closed")]
    Closed,
}

/// Routing failures reported back to the sending session
#[derive(Debug, Error)]
pub enum RouteError {
    /// The addressed recipient is not a member of the chatroom
    #[error("no member with id {0} in the chatroom")]
    RecipientNotFound(UserId),

    /// The recipient exists but the event could not be handed over
    #[error("could not deliver to {to_id}: {source}")]
    Undeliverable {
        to_id: UserId,
        #[source]
        source: DeliveryError,
    },
}

/// Server-level errors (bind, accept, session lifecycle)
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error (fatal for the affected connection or listener)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec error that terminated a session
    #[error(transparent)]
    Codec(#[from] CodecError),
}
