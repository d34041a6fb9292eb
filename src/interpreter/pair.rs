//! Evaluated value paired with its invocation context.

use super::value::Value;
use crate::runtime::error::EvalError;

/// Result of evaluating one command: the value plus the receiver that should
/// be bound as `this` if the value is later called.
///
/// Both fields are plain [`Value`]s and `Value` has no variant that can hold a
/// pair, so a pair can never wrap another pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuePair {
    receiver: Value,
    value: Value,
}

impl ValuePair {
    /// Pair a value with an explicit receiver (the `GET` binding rule).
    pub fn bound(receiver: Value, value: Value) -> Self {
        Self { receiver, value }
    }

    /// Pair a value with the agent's default receiver.
    pub fn unbound(default_receiver: &Value, value: Value) -> Self {
        Self {
            receiver: default_receiver.clone(),
            value,
        }
    }

    /// Receiver bound to the value.
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    /// The evaluated value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume the pair, keeping only the value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Call the value with its receiver. The result is paired with the
    /// default receiver: a call result is not itself a bound method.
    pub fn call_with_receiver(
        &self,
        args: &[Value],
        default_receiver: &Value,
    ) -> Result<ValuePair, EvalError> {
        let result = self.value.call(&self.receiver, args)?;
        Ok(ValuePair::unbound(default_receiver, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_uses_bound_receiver_and_returns_default_context() {
        let root = Value::from("root");
        let receiver = Value::from(10i64);
        let add = Value::function("add", |this, args| {
            let base = this.as_i64().unwrap_or_default();
            let step = args.first().and_then(Value::as_i64).unwrap_or_default();
            Ok(Value::from(base + step))
        });

        let pair = ValuePair::bound(receiver.clone(), add);
        let result = pair.call_with_receiver(&[Value::from(5i64)], &root).unwrap();
        assert_eq!(result.value(), &Value::from(15i64));
        assert_eq!(result.receiver(), &root);
    }
}
