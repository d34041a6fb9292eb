//! Wire protocol shared by the controller and the agent.
//!
//! Every message and command is a JSON array whose first element is a short
//! tag. This module keeps the tags in one place, parses top-level messages,
//! and builds the envelopes the agent sends back.

use serde_json::{Value as Json, json};

use super::command::Command;
use crate::runtime::error::ParseError;

/// Evaluate a command and discard the result.
pub const EXEC: &str = "E";
/// Evaluate a command and reply with its JSON value.
pub const GET: &str = "G";
/// Evaluate a command and cache the result under an id.
pub const CONNECT: &str = "C";
/// Drop a cached id.
pub const DISCONNECT: &str = "D";
/// Agent-to-controller error report.
pub const EXCEPTION: &str = "X";
/// Agent-to-controller callback invocation.
pub const CALLBACK: &str = "CB";
/// Liveness ping; ignored on receipt.
pub const KEEPALIVE: &str = "K";

/// Command tag: untranslated JSON literal.
pub const LITERAL: &str = "L";
/// Command tag: hex string decoded to bytes.
pub const BYTES: &str = "B";
/// Command tag: mapping of named commands.
pub const MAP: &str = "M";
/// Command tag: sequence of commands.
pub const SEQUENCE: &str = "SQ";
/// Command tag: cached object lookup.
pub const REFERENCE: &str = "R";
/// Command tag: index into a target (same tag as the GET message).
pub const GET_INDEX: &str = GET;
/// Command tag: call a callable with arguments.
pub const CALL: &str = "C";
/// Command tag: build a function that emits CALLBACK messages.
pub const CALLBACK_FUNCTION: &str = CALLBACK;
/// Command tag: index assignment.
pub const SET: &str = "S";

/// Top-level message received from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `[E, command]`
    Exec(Command),
    /// `[G, reply_id, command, depth]`
    Get {
        /// Correlation token echoed in the reply.
        reply_id: String,
        /// Command to evaluate.
        command: Command,
        /// Truncation depth for the JSON reply; `None` uses the agent default.
        depth: Option<i64>,
    },
    /// `[C, cache_id, command]`
    Connect {
        /// Id the result is cached under.
        cache_id: String,
        /// Command to evaluate.
        command: Command,
    },
    /// `[D, cache_id]`
    Disconnect {
        /// Id to forget.
        cache_id: String,
    },
    /// `[K]`
    KeepAlive,
}

impl Message {
    /// Parse a top-level envelope.
    pub fn parse(json: &Json) -> Result<Self, ParseError> {
        let (tag, operands) = split_tagged(json, "message")?;
        match tag {
            EXEC => {
                let command = Command::parse(operand(tag, operands, 0)?)?;
                Ok(Message::Exec(command))
            }
            GET => Ok(Message::Get {
                reply_id: string_operand(tag, operands, 0)?,
                command: Command::parse(operand(tag, operands, 1)?)?,
                depth: depth_operand(tag, operands, 2)?,
            }),
            CONNECT => Ok(Message::Connect {
                cache_id: string_operand(tag, operands, 0)?,
                command: Command::parse(operand(tag, operands, 1)?)?,
            }),
            DISCONNECT => Ok(Message::Disconnect {
                cache_id: string_operand(tag, operands, 0)?,
            }),
            KEEPALIVE => Ok(Message::KeepAlive),
            other => Err(ParseError::UnknownMessage(other.to_string())),
        }
    }

    /// Wire tag of the message.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Exec(_) => EXEC,
            Message::Get { .. } => GET,
            Message::Connect { .. } => CONNECT,
            Message::Disconnect { .. } => DISCONNECT,
            Message::KeepAlive => KEEPALIVE,
        }
    }

    /// Reply id carried by the message, if any.
    pub fn reply_id(&self) -> Option<&str> {
        match self {
            Message::Get { reply_id, .. } => Some(reply_id),
            _ => None,
        }
    }
}

/// `[G, reply_id, value]`
pub fn get_reply(reply_id: &str, value: Json) -> Json {
    json!([GET, reply_id, value])
}

/// `[X, message, reply_id_or_null]`
pub fn exception(message: &str, reply_id: Option<&str>) -> Json {
    json!([EXCEPTION, message, reply_id])
}

/// `[CB, id, args]`
pub fn callback(id: &str, args: Vec<Json>) -> Json {
    json!([CALLBACK, id, args])
}

/// `[K]`
pub fn keepalive() -> Json {
    json!([KEEPALIVE])
}

/// Split a tagged list into its tag and operands.
pub(crate) fn split_tagged<'a>(
    json: &'a Json,
    context: &'static str,
) -> Result<(&'a str, &'a [Json]), ParseError> {
    let items = json.as_array().ok_or(ParseError::NotAnArray {
        context,
        found: json_type(json),
    })?;
    let (head, operands) = items
        .split_first()
        .ok_or(ParseError::MissingTag(context))?;
    let tag = head.as_str().ok_or_else(|| match context {
        "message" => ParseError::UnknownMessage(head.to_string()),
        _ => ParseError::UnknownCommand(head.to_string()),
    })?;
    Ok((tag, operands))
}

pub(crate) fn operand<'a>(
    tag: &str,
    operands: &'a [Json],
    index: usize,
) -> Result<&'a Json, ParseError> {
    operands
        .get(index)
        .ok_or_else(|| ParseError::malformed(tag, format!("missing operand {index}")))
}

pub(crate) fn string_operand(
    tag: &str,
    operands: &[Json],
    index: usize,
) -> Result<String, ParseError> {
    operand(tag, operands, index)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ParseError::malformed(tag, format!("operand {index} must be a string")))
}

pub(crate) fn depth_operand(
    tag: &str,
    operands: &[Json],
    index: usize,
) -> Result<Option<i64>, ParseError> {
    match operands.get(index) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Number(num)) => Ok(num
            .as_i64()
            .or_else(|| num.as_f64().map(|n| n.floor() as i64))),
        Some(_) => Err(ParseError::malformed(tag, "depth must be a number")),
    }
}

pub(crate) fn json_type(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
