//! Message dispatcher.
//!
//! Owns the reply and error policy for top-level messages: `GET` replies are
//! JSON-safe encoded and sent, `CONNECT` results are cached, and any failure
//! is reported once as an `EXCEPTION` envelope and then returned to the
//! caller. Deferred results are handled by binding continuations that finish
//! the message later.

use serde_json::Value as Json;
use std::sync::Arc;

use super::cache::ReferenceCache;
use super::context::Interpreter;
use super::deferred::Deferred;
use super::outbox::Outbox;
use super::protocol::{self, Message};
use super::value::Value;
use crate::runtime::error::{AgentError, ParseError, Result};

/// How a message finished on the call that dispatched it.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The message completed; the evaluated value is returned for callers.
    Completed(Value),
    /// Evaluation produced a deferred value; the message completes when it
    /// settles.
    Deferred(Deferred),
}

impl Outcome {
    /// Completed value, if the message did not defer.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Deferred(_) => None,
        }
    }

    /// Whether the message is waiting on a deferred value.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred(_))
    }
}

/// Parses and executes top-level messages against one interpreter.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    interp: Interpreter,
}

impl Dispatcher {
    /// Create a dispatcher over an interpreter context.
    pub fn new(interp: Interpreter) -> Self {
        Self { interp }
    }

    /// Interpreter context.
    pub fn interpreter(&self) -> &Interpreter {
        &self.interp
    }

    /// Reference cache of the session.
    pub fn cache(&self) -> &Arc<ReferenceCache> {
        self.interp.cache()
    }

    /// Parse a top-level envelope. A bad envelope is reported as an exception
    /// with no reply id before the error is returned.
    pub fn parse_message(&self, json: &Json) -> std::result::Result<Message, ParseError> {
        Message::parse(json).inspect_err(|err| {
            tracing::warn!(error = %err, "rejected message");
            report(self.interp.outbox().as_ref(), &err.to_string(), None);
        })
    }

    /// Parse and execute one envelope.
    pub fn dispatch(&self, json: &Json) -> Result<Outcome> {
        let message = self.parse_message(json)?;
        self.execute(&message)
    }

    /// Execute a parsed message.
    pub fn execute(&self, message: &Message) -> Result<Outcome> {
        tracing::debug!(tag = message.tag(), "executing message");
        self.run(message).inspect_err(|err| {
            report(self.interp.outbox().as_ref(), &err.to_string(), message.reply_id());
        })
    }

    fn run(&self, message: &Message) -> Result<Outcome> {
        match message {
            Message::Exec(command) => {
                let value = self.interp.evaluate(command)?.into_value();
                match value {
                    Value::Deferred(deferred) => {
                        let outbox = self.interp.outbox().clone();
                        deferred.bind(
                            Box::new(|_: Value| tracing::debug!("deferred exec resolved")),
                            Box::new(move |message: String| {
                                report(outbox.as_ref(), &message, None)
                            }),
                        )?;
                        Ok(Outcome::Deferred(deferred))
                    }
                    value => Ok(Outcome::Completed(value)),
                }
            }
            Message::Get {
                reply_id,
                command,
                depth,
            } => {
                let depth = depth.unwrap_or_else(|| self.interp.default_depth());
                let value = self.interp.evaluate(command)?.into_value();
                match value {
                    Value::Deferred(deferred) => {
                        let resolve_outbox = self.interp.outbox().clone();
                        let reject_outbox = resolve_outbox.clone();
                        let resolve_id = reply_id.clone();
                        let reject_id = reply_id.clone();
                        deferred.bind(
                            Box::new(move |value: Value| {
                                send_reply(resolve_outbox.as_ref(), &resolve_id, &value, depth)
                            }),
                            Box::new(move |message: String| {
                                report(reject_outbox.as_ref(), &message, Some(reject_id.as_str()))
                            }),
                        )?;
                        Ok(Outcome::Deferred(deferred))
                    }
                    value => {
                        send_reply(self.interp.outbox().as_ref(), reply_id, &value, depth);
                        Ok(Outcome::Completed(value))
                    }
                }
            }
            Message::Connect { cache_id, command } => {
                let value = self.interp.evaluate(command)?.into_value();
                match value {
                    Value::Deferred(deferred) => {
                        let cache = self.interp.cache().clone();
                        let outbox = self.interp.outbox().clone();
                        let cache_id = cache_id.clone();
                        deferred.bind(
                            Box::new(move |value: Value| cache.set(cache_id, value)),
                            Box::new(move |message: String| {
                                report(outbox.as_ref(), &message, None)
                            }),
                        )?;
                        Ok(Outcome::Deferred(deferred))
                    }
                    value => {
                        self.interp.cache().set(cache_id.clone(), value.clone());
                        Ok(Outcome::Completed(value))
                    }
                }
            }
            Message::Disconnect { cache_id } => {
                if self.interp.cache().forget(cache_id).is_none() {
                    tracing::debug!(id = %cache_id, "disconnect of unknown id");
                }
                Ok(Outcome::Completed(Value::Null))
            }
            Message::KeepAlive => Ok(Outcome::Completed(Value::Null)),
        }
    }

    /// Report an error that happened outside message execution (for example
    /// a decode failure) as an untagged exception.
    pub fn report_error(&self, err: &AgentError) {
        report(self.interp.outbox().as_ref(), &err.to_string(), None);
    }
}

fn send_reply(outbox: &dyn Outbox, reply_id: &str, value: &Value, depth: i64) {
    outbox.emit(protocol::get_reply(reply_id, value.json_safe(depth)));
}

fn report(outbox: &dyn Outbox, message: &str, reply_id: Option<&str>) {
    if outbox.is_halted() {
        tracing::debug!(error = %message, "connection halted; exception not reported");
        return;
    }
    tracing::warn!(error = %message, reply_id, "reporting exception");
    outbox.emit(protocol::exception(message, reply_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::outbox::RecordingOutbox;
    use serde_json::json;

    fn dispatcher() -> (Dispatcher, Arc<RecordingOutbox>) {
        let outbox = RecordingOutbox::new();
        let interp = Interpreter::new(Value::Null, outbox.clone());
        (Dispatcher::new(interp), outbox)
    }

    #[test]
    fn exec_transmits_nothing() {
        let (dispatcher, outbox) = dispatcher();
        let outcome = dispatcher.dispatch(&json!(["E", ["L", 5]])).unwrap();
        assert_eq!(outcome.value(), Some(&Value::from(5i64)));
        assert!(outbox.sent().is_empty());
    }

    #[test]
    fn failure_is_reported_with_reply_id_and_returned() {
        let (dispatcher, outbox) = dispatcher();
        let err = dispatcher
            .dispatch(&json!(["G", "r1", ["R", "missing"], 1]))
            .unwrap_err();
        assert!(matches!(err, AgentError::Eval(_)));
        let sent = outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], json!("X"));
        assert_eq!(sent[0][2], json!("r1"));
    }

    #[test]
    fn halted_outbox_suppresses_reports() {
        let (dispatcher, outbox) = dispatcher();
        outbox.set_halted(true);
        assert!(dispatcher.dispatch(&json!(["bogus"])).is_err());
        assert!(outbox.sent().is_empty());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (dispatcher, _) = dispatcher();
        assert!(dispatcher.dispatch(&json!(["D", "never"])).is_ok());
        assert!(dispatcher.dispatch(&json!(["D", "never"])).is_ok());
    }
}
