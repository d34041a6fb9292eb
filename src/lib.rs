//! Tendril – the agent side of a remote-execution protocol
//!
//! A controller on the far end of a persistent duplex channel sends compact
//! instruction trees; this crate decodes and evaluates them and replies with
//! JSON-safe results. It provides:
//! - An interpreter for the tagged command language that threads the receiver
//!   a method call is bound to through every evaluation step
//! - A reference cache that gives the controller stable handles on agent values
//! - Deferred results that let a reply outlive the call that triggered it
//! - A packetized transport with acknowledgments, ordered sends and reconnects

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Command interpreter, value model and message dispatcher
pub mod interpreter;
/// Codec, packetizer, transports and the connection pipeline
pub mod runtime;

// Re-export key types for convenience
pub use interpreter::{Dispatcher, HostObject, Interpreter, PropertyBag, Value};
pub use runtime::error::{AgentError, Result};
pub use runtime::{AgentConfig, Pipeline};

/// Current version of the Tendril agent
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version spoken with the controller
pub const PROTOCOL_VERSION: &str = "1.0.0";
