//! Evaluation context shared by every command of one agent session.

use std::fmt;
use std::sync::Arc;

use super::cache::ReferenceCache;
use super::command::Command;
use super::outbox::Outbox;
use super::pair::ValuePair;
use super::value::Value;
use crate::runtime::error::EvalError;

/// Depth used for GET replies and callback arguments that do not give one.
/// At zero only scalars survive; every composite renders as `null`.
pub const DEFAULT_DEPTH: i64 = 0;

/// Ambient state commands evaluate against: the default receiver, the
/// reference cache and the outbound channel used by callbacks.
#[derive(Clone)]
pub struct Interpreter {
    root: Value,
    cache: Arc<ReferenceCache>,
    outbox: Arc<dyn Outbox>,
    default_depth: i64,
}

impl Interpreter {
    /// Create a context with an empty cache.
    pub fn new(root: Value, outbox: Arc<dyn Outbox>) -> Self {
        Self {
            root,
            cache: Arc::new(ReferenceCache::new()),
            outbox,
            default_depth: DEFAULT_DEPTH,
        }
    }

    /// Share an existing cache.
    pub fn with_cache(mut self, cache: Arc<ReferenceCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Override the depth used when a GET or callback gives none.
    pub fn with_default_depth(mut self, depth: i64) -> Self {
        self.default_depth = depth;
        self
    }

    /// Default receiver.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Reference cache of the session.
    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    /// Outbound channel.
    pub fn outbox(&self) -> &Arc<dyn Outbox> {
        &self.outbox
    }

    /// Depth used when a GET or callback gives none.
    pub fn default_depth(&self) -> i64 {
        self.default_depth
    }

    /// Evaluate a command in this context.
    pub fn evaluate(&self, command: &Command) -> Result<ValuePair, EvalError> {
        command.evaluate(self, false)
    }

    /// Pair a value with the default receiver.
    pub(crate) fn unbound(&self, value: Value) -> ValuePair {
        ValuePair::unbound(&self.root, value)
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("root", &self.root)
            .field("cached", &self.cache.len())
            .field("default_depth", &self.default_depth)
            .finish()
    }
}
