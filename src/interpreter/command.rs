//! Instruction-tree commands.
//!
//! A command node is a JSON list `[tag, operands...]`. [`Command::parse`]
//! turns it into one of nine variants; [`Command::evaluate`] reduces the
//! variant to a [`ValuePair`]. Evaluation is synchronous: a host function
//! that cannot answer immediately returns a [`Value::Deferred`] and the
//! dispatcher takes it from there.

use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::context::Interpreter;
use super::pair::ValuePair;
use super::protocol::{self, operand, split_tagged, string_operand};
use super::value::{Value, from_hex};
use crate::runtime::error::{EvalError, ParseError};

/// Parsed instruction-tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `[L, json]`
    Literal(Json),
    /// `[B, hex]`
    Bytes(String),
    /// `[M, {name: command}]`
    Map(BTreeMap<String, Command>),
    /// `[SQ, [command]]`
    Sequence(Vec<Command>),
    /// `[R, id]`
    Reference(String),
    /// `[G, target, index]`
    Get {
        /// Object being indexed.
        target: Box<Command>,
        /// Property key.
        index: Box<Command>,
    },
    /// `[C, callable, [args]]`
    Call {
        /// Function to invoke, usually a `Get` so the receiver is bound.
        callable: Box<Command>,
        /// Positional arguments.
        args: Vec<Command>,
    },
    /// `[CB, id, depth]`
    Callback {
        /// Controller-side callback id.
        id: String,
        /// Truncation depth for the arguments; `None` uses the session default.
        depth: Option<i64>,
    },
    /// `[S, target, index, value]`
    Set {
        /// Object being assigned into.
        target: Box<Command>,
        /// Property key.
        index: Box<Command>,
        /// Assigned value.
        value: Box<Command>,
    },
}

impl Command {
    /// Parse an instruction-tree node.
    pub fn parse(json: &Json) -> Result<Self, ParseError> {
        let (tag, operands) = split_tagged(json, "command")?;
        match tag {
            protocol::LITERAL => Ok(Command::Literal(operand(tag, operands, 0)?.clone())),
            protocol::BYTES => Ok(Command::Bytes(string_operand(tag, operands, 0)?)),
            protocol::MAP => {
                let entries = operand(tag, operands, 0)?
                    .as_object()
                    .ok_or_else(|| ParseError::malformed(tag, "expected an object of commands"))?;
                let map = entries
                    .iter()
                    .map(|(name, node)| Ok((name.clone(), Command::parse(node)?)))
                    .collect::<Result<BTreeMap<_, _>, ParseError>>()?;
                Ok(Command::Map(map))
            }
            protocol::SEQUENCE => Ok(Command::Sequence(parse_list(
                tag,
                operand(tag, operands, 0)?,
            )?)),
            protocol::REFERENCE => Ok(Command::Reference(string_operand(tag, operands, 0)?)),
            protocol::GET_INDEX => Ok(Command::Get {
                target: Box::new(Command::parse(operand(tag, operands, 0)?)?),
                index: Box::new(Command::parse(operand(tag, operands, 1)?)?),
            }),
            protocol::CALL => Ok(Command::Call {
                callable: Box::new(Command::parse(operand(tag, operands, 0)?)?),
                args: match operands.get(1) {
                    None | Some(Json::Null) => Vec::new(),
                    Some(list) => parse_list(tag, list)?,
                },
            }),
            protocol::CALLBACK_FUNCTION => Ok(Command::Callback {
                id: string_operand(tag, operands, 0)?,
                depth: protocol::depth_operand(tag, operands, 1)?,
            }),
            protocol::SET => Ok(Command::Set {
                target: Box::new(Command::parse(operand(tag, operands, 0)?)?),
                index: Box::new(Command::parse(operand(tag, operands, 1)?)?),
                value: Box::new(Command::parse(operand(tag, operands, 2)?)?),
            }),
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }

    /// Wire tag of the command.
    pub fn tag(&self) -> &'static str {
        match self {
            Command::Literal(_) => protocol::LITERAL,
            Command::Bytes(_) => protocol::BYTES,
            Command::Map(_) => protocol::MAP,
            Command::Sequence(_) => protocol::SEQUENCE,
            Command::Reference(_) => protocol::REFERENCE,
            Command::Get { .. } => protocol::GET_INDEX,
            Command::Call { .. } => protocol::CALL,
            Command::Callback { .. } => protocol::CALLBACK_FUNCTION,
            Command::Set { .. } => protocol::SET,
        }
    }

    /// Evaluate the command.
    ///
    /// With `truthiness_required`, a result that is absent (see
    /// [`Value::is_present`]) is an error instead of a value.
    pub fn evaluate(
        &self,
        interp: &Interpreter,
        truthiness_required: bool,
    ) -> Result<ValuePair, EvalError> {
        if truthiness_required {
            self.evaluate_required(interp, "target")
        } else {
            self.evaluate_inner(interp)
        }
    }

    fn evaluate_required(
        &self,
        interp: &Interpreter,
        position: &'static str,
    ) -> Result<ValuePair, EvalError> {
        let pair = self.evaluate_inner(interp)?;
        if !pair.value().is_present() {
            return Err(EvalError::Falsy {
                position,
                found: pair.value().describe(),
            });
        }
        Ok(pair)
    }

    fn evaluate_inner(&self, interp: &Interpreter) -> Result<ValuePair, EvalError> {
        match self {
            Command::Literal(json) => Ok(interp.unbound(Value::from_json(json))),
            Command::Bytes(text) => Ok(interp.unbound(Value::Bytes(from_hex(text)?))),
            Command::Map(entries) => {
                let mut values = Vec::with_capacity(entries.len());
                for (name, command) in entries {
                    values.push((name.clone(), command.evaluate(interp, false)?.into_value()));
                }
                Ok(interp.unbound(Value::object(values)))
            }
            Command::Sequence(items) => {
                let values = evaluate_all(items, interp)?;
                Ok(interp.unbound(Value::array(values)))
            }
            Command::Reference(id) => Ok(interp.unbound(interp.cache().get(id)?)),
            Command::Get { target, index } => {
                let target = target.evaluate_required(interp, "target")?.into_value();
                let index = index.evaluate(interp, false)?.into_value();
                let value = target.get_index(&index)?;
                Ok(ValuePair::bound(target, value))
            }
            Command::Call { callable, args } => {
                let callable = callable.evaluate_required(interp, "callable")?;
                let args = evaluate_all(args, interp)?;
                callable.call_with_receiver(&args, interp.root())
            }
            Command::Callback { id, depth } => {
                let depth = depth.unwrap_or_else(|| interp.default_depth());
                Ok(interp.unbound(callback_function(id, depth, interp)))
            }
            Command::Set {
                target,
                index,
                value,
            } => {
                let target = target.evaluate_required(interp, "target")?;
                let index = index.evaluate(interp, false)?.into_value();
                let value = value.evaluate(interp, false)?.into_value();
                target.value().set_index(&index, value)?;
                Ok(target)
            }
        }
    }
}

fn parse_list(tag: &str, json: &Json) -> Result<Vec<Command>, ParseError> {
    json.as_array()
        .ok_or_else(|| ParseError::malformed(tag, "expected a list of commands"))?
        .iter()
        .map(Command::parse)
        .collect()
}

fn evaluate_all(commands: &[Command], interp: &Interpreter) -> Result<Vec<Value>, EvalError> {
    commands
        .iter()
        .map(|command| Ok(command.evaluate(interp, false)?.into_value()))
        .collect()
}

/// Function that forwards its arguments to the controller as a CALLBACK
/// message and returns the envelope it sent.
fn callback_function(id: &str, depth: i64, interp: &Interpreter) -> Value {
    let id: Arc<str> = Arc::from(id);
    let outbox = interp.outbox().clone();
    let name = format!("callback {id}");
    Value::function(&name, move |_this, args| {
        let args = args.iter().map(|arg| arg.json_safe(depth)).collect();
        let envelope = protocol::callback(&id, args);
        tracing::debug!(callback = %id, "emitting callback");
        outbox.emit(envelope.clone());
        Ok(Value::from_json(&envelope))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::outbox::RecordingOutbox;
    use serde_json::json;

    fn interpreter() -> (Interpreter, Arc<RecordingOutbox>) {
        let outbox = RecordingOutbox::new();
        let root = Value::object([("name", Value::from("root"))]);
        (Interpreter::new(root, outbox.clone()), outbox)
    }

    fn eval(interp: &Interpreter, node: Json) -> Result<ValuePair, EvalError> {
        interp.evaluate(&Command::parse(&node).unwrap())
    }

    #[test]
    fn literal_carries_default_receiver() {
        let (interp, _) = interpreter();
        let pair = eval(&interp, json!(["L", {"a": [1, 2]}])).unwrap();
        assert_eq!(pair.value().json_safe(5), json!({"a": [1, 2]}));
        assert_eq!(pair.receiver(), interp.root());
    }

    #[test]
    fn bytes_decode_hex() {
        let (interp, _) = interpreter();
        let pair = eval(&interp, json!(["B", "00ff10"])).unwrap();
        assert_eq!(pair.value(), &Value::Bytes(vec![0x00, 0xff, 0x10]));
        assert!(matches!(eval(&interp, json!(["B", "abc"])), Err(EvalError::Hex(_))));
    }

    #[test]
    fn map_and_sequence_evaluate_children() {
        let (interp, _) = interpreter();
        let pair = eval(
            &interp,
            json!(["M", {"xs": ["SQ", [["L", 1], ["B", "0a"]]], "y": ["L", "z"]}]),
        )
        .unwrap();
        assert_eq!(pair.value().json_safe(5), json!({"xs": [1, "0a"], "y": "z"}));
    }

    #[test]
    fn get_rebinds_receiver_to_target() {
        let (interp, _) = interpreter();
        let pair = eval(&interp, json!(["G", ["L", {"k": "v"}], ["L", "k"]])).unwrap();
        assert_eq!(pair.value(), &Value::from("v"));
        assert_eq!(pair.receiver().json_safe(2), json!({"k": "v"}));
    }

    #[test]
    fn receiver_positions_must_be_present() {
        let (interp, _) = interpreter();
        for target in [json!(null), json!(0), json!(""), json!([]), json!({})] {
            let result = eval(&interp, json!(["G", ["L", target], ["L", "k"]]));
            assert!(matches!(result, Err(EvalError::Falsy { .. })), "{result:?}");
        }
        // Missing arguments and assigned values are fine.
        assert!(eval(&interp, json!(["S", ["L", {"k": 1}], ["L", "k"], ["L", null]])).is_ok());
    }

    #[test]
    fn set_assigns_through_cached_reference() {
        let (interp, _) = interpreter();
        interp.cache().set("obj", Value::object([("a", Value::from(1i64))]));
        let pair = eval(&interp, json!(["S", ["R", "obj"], ["L", "b"], ["L", 2]])).unwrap();
        assert_eq!(pair.value().json_safe(2), json!({"a": 1, "b": 2}));
        assert_eq!(
            interp.cache().get("obj").unwrap().json_safe(2),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn callback_emits_envelope_and_returns_it() {
        let (interp, outbox) = interpreter();
        let callback = eval(&interp, json!(["CB", "cb1", 1])).unwrap().into_value();
        let result = callback
            .call(&Value::Null, &[Value::from(7i64), Value::array(vec![Value::array(vec![])])])
            .unwrap();
        let expected = json!(["CB", "cb1", [7, [null]]]);
        assert_eq!(outbox.sent(), vec![expected.clone()]);
        assert_eq!(result.json_safe(5), expected);
    }

    #[test]
    fn unknown_command_tag_is_rejected() {
        assert!(matches!(
            Command::parse(&json!(["Q", 1])),
            Err(ParseError::UnknownCommand(tag)) if tag == "Q"
        ));
        assert!(matches!(
            Command::parse(&json!({"L": 1})),
            Err(ParseError::NotAnArray { context: "command", .. })
        ));
    }
}
