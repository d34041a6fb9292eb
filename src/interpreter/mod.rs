//! Command interpreter for the Tendril agent.
//!
//! The controller describes work as small instruction trees. This module
//! parses them into [`Command`]s, evaluates them against agent-local
//! [`Value`]s while threading the receiver a method call is bound to, keeps
//! the [`ReferenceCache`] of controller-held handles, and turns top-level
//! [`Message`]s into replies through the [`Dispatcher`].

/// Reference cache keyed by controller-chosen ids.
pub mod cache;
/// Instruction-tree commands and their evaluation.
pub mod command;
/// Evaluation context shared by a session.
pub mod context;
/// Values that settle after the evaluating call returns.
pub mod deferred;
/// Message dispatcher and reply policy.
pub mod dispatcher;
/// Object-model provider seam.
pub mod host;
/// Outbound envelope sinks.
pub mod outbox;
/// Value paired with its receiver.
pub mod pair;
/// Wire tags, messages and envelopes.
pub mod protocol;
/// Agent-local value model.
pub mod value;

pub use cache::ReferenceCache;
pub use command::Command;
pub use context::{DEFAULT_DEPTH, Interpreter};
pub use deferred::{Deferred, OnReject, OnResolve};
pub use dispatcher::{Dispatcher, Outcome};
pub use host::{HostObject, PropertyBag};
pub use outbox::{ChannelOutbox, Outbox, RecordingOutbox};
pub use pair::ValuePair;
pub use protocol::Message;
pub use value::{Function, PropertyKey, Value, from_hex, to_hex};
