//! Deferred values: evaluation results that complete later.
//!
//! A host function may return a [`Deferred`] instead of a final value. The
//! dispatcher notices this and binds resolve/reject continuations describing
//! what the message should do once the real outcome is known; whoever owns the
//! asynchronous operation later calls [`Deferred::resolve`] or
//! [`Deferred::reject`]. Settlement may happen before or after binding.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::value::Value;
use crate::runtime::error::ProtocolError;

/// Continuation run with the resolved value.
pub type OnResolve = Box<dyn FnOnce(Value) + Send>;
/// Continuation run with the rejection message.
pub type OnReject = Box<dyn FnOnce(String) + Send>;

enum Outcome {
    Resolved(Value),
    Rejected(String),
}

#[derive(Default)]
struct DeferredState {
    bound: bool,
    settled: bool,
    on_resolve: Option<OnResolve>,
    on_reject: Option<OnReject>,
    early: Option<Outcome>,
}

/// Placeholder result with single-use resolve/reject continuations.
#[derive(Clone)]
pub struct Deferred {
    id: Uuid,
    state: Arc<Mutex<DeferredState>>,
}

impl Deferred {
    /// Create an unbound, unsettled placeholder.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Arc::new(Mutex::new(DeferredState::default())),
        }
    }

    /// Identifier used in diagnostics.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Bind the continuations. Binding twice is a protocol error.
    ///
    /// If the value already settled, the matching continuation runs before
    /// this call returns.
    pub fn bind(&self, on_resolve: OnResolve, on_reject: OnReject) -> Result<(), ProtocolError> {
        let early = {
            let mut state = self.state.lock();
            if state.bound {
                return Err(ProtocolError::AlreadyBound);
            }
            state.bound = true;
            match state.early.take() {
                Some(outcome) => Some(outcome),
                None => {
                    state.on_resolve = Some(on_resolve);
                    state.on_reject = Some(on_reject);
                    return Ok(());
                }
            }
        };

        match early {
            Some(Outcome::Resolved(value)) => on_resolve(value),
            Some(Outcome::Rejected(message)) => on_reject(message),
            None => {}
        }
        Ok(())
    }

    /// Complete with a value.
    pub fn resolve(&self, value: Value) -> Result<(), ProtocolError> {
        let continuation = {
            let mut state = self.mark_settled()?;
            match state.on_resolve.take() {
                Some(on_resolve) => {
                    state.on_reject = None;
                    on_resolve
                }
                None => {
                    state.early = Some(Outcome::Resolved(value));
                    return Ok(());
                }
            }
        };
        continuation(value);
        Ok(())
    }

    /// Complete with an error message.
    pub fn reject(&self, message: impl Into<String>) -> Result<(), ProtocolError> {
        let message = message.into();
        let continuation = {
            let mut state = self.mark_settled()?;
            match state.on_reject.take() {
                Some(on_reject) => {
                    state.on_resolve = None;
                    on_reject
                }
                None => {
                    state.early = Some(Outcome::Rejected(message));
                    return Ok(());
                }
            }
        };
        continuation(message);
        Ok(())
    }

    /// Whether continuations have been bound.
    pub fn is_bound(&self) -> bool {
        self.state.lock().bound
    }

    /// Whether the value has been resolved or rejected.
    pub fn is_settled(&self) -> bool {
        self.state.lock().settled
    }

    /// Identity comparison.
    pub fn same_as(&self, other: &Deferred) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    fn mark_settled(&self) -> Result<parking_lot::MutexGuard<'_, DeferredState>, ProtocolError> {
        let mut state = self.state.lock();
        if state.settled {
            return Err(ProtocolError::AlreadySettled);
        }
        state.settled = true;
        Ok(state)
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Deferred")
            .field("id", &self.id)
            .field("bound", &state.bound)
            .field("settled", &state.settled)
            .finish()
    }
}
