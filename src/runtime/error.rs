//! Error types for the Tendril agent
//!
//! Every area gets its own `thiserror` enum; [`AgentError`] aggregates them at
//! message and frame boundaries where faults are turned into `EXCEPTION`
//! envelopes or surfaced to the caller.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Top-level agent error
#[derive(Debug, Error)]
pub enum AgentError {
    /// Instruction tree or envelope failed to parse
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Command evaluation failed
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Wire text could not be decoded or an envelope could not be encoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport-level failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol invariant violated
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type using AgentError
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors raised while turning untyped JSON into messages or commands
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A node that should be a tagged list was something else
    #[error("{context} json should be array: {found}")]
    NotAnArray {
        /// What was being parsed (message or command)
        context: &'static str,
        /// JSON type that was found instead
        found: &'static str,
    },

    /// Tagged list with no tag
    #[error("empty {0} array has no indicator")]
    MissingTag(&'static str),

    /// Top-level message tag is not recognised
    #[error("no message parser for indicator: {0}")]
    UnknownMessage(String),

    /// Command tag is not recognised
    #[error("no command parser for indicator: {0}")]
    UnknownCommand(String),

    /// Operands do not have the shape the tag requires
    #[error("malformed {tag} operands: {detail}")]
    Malformed {
        /// Tag whose operands were rejected
        tag: String,
        /// Description of the problem
        detail: String,
    },
}

impl ParseError {
    pub(crate) fn malformed(tag: &str, detail: impl Into<String>) -> Self {
        ParseError::Malformed {
            tag: tag.to_string(),
            detail: detail.into(),
        }
    }
}

/// Errors raised while evaluating a parsed command
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Reference id is not in the cache
    #[error("no such object found for id: {0}")]
    MissingReference(String),

    /// A receiver position evaluated to an absent value
    #[error("{position} evaluated to a falsy value: {found}")]
    Falsy {
        /// Which operand was required (target, callable)
        position: &'static str,
        /// Short rendering of the offending value
        found: String,
    },

    /// Value cannot be indexed
    #[error("cannot index into {0}")]
    NotIndexable(String),

    /// Value cannot be assigned into
    #[error("cannot assign into {0}")]
    NotAssignable(String),

    /// Value cannot be called
    #[error("{0} is not callable")]
    NotCallable(String),

    /// Index value cannot be used as a property key
    #[error("invalid property key: {0}")]
    InvalidKey(String),

    /// Hex payload of a BYTES command could not be decoded
    #[error("hex decode failed: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Agent-side code raised an error
    #[error("{0}")]
    Host(String),
}

impl EvalError {
    /// Convenience constructor for errors raised by host functions and objects.
    pub fn host(message: impl Into<String>) -> Self {
        EvalError::Host(message.into())
    }
}

/// Wire codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Inbound text was not valid JSON
    #[error("failed to parse JSON: {0}")]
    Decode(String),

    /// Outbound envelope could not be serialised
    #[error("failed to encode JSON: {0}")]
    Encode(String),
}

/// Transport and connection lifecycle errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reconnect attempts exhausted
    #[error("reconnect limit of {0} attempts exceeded")]
    ReconnectLimit(u32),

    /// Could not acquire the send lock in time
    #[error("timed out after {0:?} waiting for send lock")]
    LockTimeout(Duration),

    /// No acknowledgment arrived for a continue frame
    #[error("timed out after {0:?} waiting for acknowledgment")]
    AckTimeout(Duration),

    /// Frame started with an indicator we do not understand
    #[error("unknown frame indicator: {0}")]
    UnknownIndicator(String),

    /// The connection has been halted and refuses further sends
    #[error("connection is halted")]
    Halted,

    /// The transport is not open
    #[error("transport is closed")]
    Closed,

    /// Transport URL could not be understood
    #[error("invalid transport url: {0}")]
    InvalidUrl(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Protocol invariant violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Continuations were bound to a deferred value twice
    #[error("deferred value is already bound")]
    AlreadyBound,

    /// A deferred value was resolved or rejected twice
    #[error("deferred value is already settled")]
    AlreadySettled,

    /// An acknowledgment frame arrived with no send waiting for it
    #[error("acknowledgment received with no outstanding send")]
    UnexpectedAcknowledgment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_offending_detail() {
        let err = AgentError::from(ParseError::UnknownMessage("bad".into()));
        assert_eq!(
            err.to_string(),
            "parse error: no message parser for indicator: bad"
        );

        let err = EvalError::MissingReference("thing".into());
        assert_eq!(err.to_string(), "no such object found for id: thing");
    }

    #[test]
    fn host_errors_render_verbatim() {
        let err = AgentError::from(EvalError::host("boom"));
        assert_eq!(err.to_string(), "evaluation error: boom");
    }
}
