//! Object-model provider seam.
//!
//! The agent never defines what the objects it manipulates are; it only
//! reaches them through `GET`, `SET` and `CALL`. Anything that wants to be
//! reachable implements [`HostObject`].

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;

use super::value::{PropertyKey, Value};
use crate::runtime::error::EvalError;

/// An object exposed to the controller by the embedding application.
pub trait HostObject: Send + Sync {
    /// Read a property. Unknown properties should read as [`Value::Null`].
    fn get(&self, key: &PropertyKey) -> Result<Value, EvalError>;

    /// Assign a property.
    fn set(&self, key: &PropertyKey, _value: Value) -> Result<(), EvalError> {
        Err(EvalError::NotAssignable(format!(
            "{} (property {})",
            self.describe(),
            key
        )))
    }

    /// Enumerable properties, used when the object is converted to JSON.
    fn entries(&self) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Short label used in diagnostics.
    fn describe(&self) -> String {
        "host object".to_string()
    }
}

/// A mutable bag of named properties.
///
/// Serves as the default root object of an agent and as a convenient
/// building block for host objects whose methods read their receiver.
#[derive(Default)]
pub struct PropertyBag {
    label: String,
    properties: RwLock<BTreeMap<String, Value>>,
}

impl PropertyBag {
    /// Create an empty bag with a diagnostic label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            properties: RwLock::new(BTreeMap::new()),
        }
    }

    /// Builder-style insert.
    pub fn with(self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder-style insert of a native method.
    pub fn with_method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        let method = Value::function(name, f);
        self.with(name, method)
    }

    /// Insert or replace a property.
    pub fn insert(&self, name: impl Into<String>, value: Value) {
        self.properties.write().insert(name.into(), value);
    }

    /// Remove a property.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.properties.write().remove(name)
    }
}

impl HostObject for PropertyBag {
    fn get(&self, key: &PropertyKey) -> Result<Value, EvalError> {
        Ok(self
            .properties
            .read()
            .get(&key.name())
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn set(&self, key: &PropertyKey, value: Value) -> Result<(), EvalError> {
        self.insert(key.name(), value);
        Ok(())
    }

    fn entries(&self) -> Vec<(String, Value)> {
        self.properties
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn describe(&self) -> String {
        if self.label.is_empty() {
            "property bag".to_string()
        } else {
            self.label.clone()
        }
    }
}

impl fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyBag")
            .field("label", &self.label)
            .field("properties", &*self.properties.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bag_reads_writes_and_enumerates() {
        let bag = Value::host(PropertyBag::new("window").with("title", Value::from("hi")));
        assert_eq!(bag.get_index(&Value::from("title")).unwrap(), Value::from("hi"));
        assert_eq!(bag.get_index(&Value::from("missing")).unwrap(), Value::Null);

        bag.set_index(&Value::from("width"), Value::from(640i64)).unwrap();
        assert_eq!(bag.json_safe(1), json!({"title": "hi", "width": 640}));
    }

    #[test]
    fn host_objects_are_read_only_by_default() {
        struct Fixed;
        impl HostObject for Fixed {
            fn get(&self, _key: &PropertyKey) -> Result<Value, EvalError> {
                Ok(Value::from(1i64))
            }
        }

        let fixed = Value::host(Fixed);
        assert!(fixed.set_index(&Value::from("x"), Value::Null).is_err());
        assert_eq!(fixed.json_safe(3), json!({}));
    }
}
