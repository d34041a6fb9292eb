use parking_lot::RwLock;
use serde_json::{Map, Number, Value as Json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::deferred::Deferred;
use super::host::HostObject;
use crate::runtime::error::EvalError;

/// Shared, interior-mutable storage used for composite agent values.
pub type Shared<T> = Arc<RwLock<T>>;

/// Largest run of `null` padding an array assignment may create past the end.
const MAX_ARRAY_GAP: usize = 1 << 16;

/// Floats at or above 2^53 are not exact integers and never index arrays.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value, EvalError> + Send + Sync;

/// Agent-local value produced by evaluating commands.
///
/// Arrays and objects are shared handles: a value fetched through the
/// reference cache and mutated by `SET` is the same value a later
/// `REFERENCE` sees.
#[derive(Clone)]
pub enum Value {
    /// JSON null (also stands in for "undefined").
    Null,
    /// Boolean.
    Bool(bool),
    /// JSON number.
    Number(Number),
    /// UTF-8 string.
    String(String),
    /// Binary buffer, rendered as lowercase hex on the wire.
    Bytes(Vec<u8>),
    /// Ordered sequence.
    Array(Shared<Vec<Value>>),
    /// Plain string-keyed mapping.
    Object(Shared<BTreeMap<String, Value>>),
    /// Native callable.
    Function(Function),
    /// Object supplied by the object-model provider.
    Host(Arc<dyn HostObject>),
    /// Placeholder completed later by an asynchronous operation.
    Deferred(Deferred),
}

impl Value {
    /// Build a shared array value.
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    /// Build a shared object value from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        Value::Object(Arc::new(RwLock::new(map)))
    }

    /// Wrap a host object.
    pub fn host(object: impl HostObject + 'static) -> Self {
        Value::Host(Arc::new(object))
    }

    /// Wrap a native function.
    pub fn function<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Value::Function(Function::new(name, f))
    }

    /// Convert controller-supplied JSON into an agent value.
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(flag) => Value::Bool(*flag),
            Json::Number(num) => Value::Number(num.clone()),
            Json::String(text) => Value::String(text.clone()),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value))),
            ),
        }
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Host(_) => "host object",
            Value::Deferred(_) => "deferred value",
        }
    }

    /// JavaScript-style truthiness: `null`, `false`, `0`, `NaN` and `""` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(flag) => *flag,
            Value::Number(num) => num.as_f64().map(|n| n != 0.0 && !n.is_nan()).unwrap_or(true),
            Value::String(text) => !text.is_empty(),
            _ => true,
        }
    }

    /// Presence test applied to receiver positions.
    ///
    /// Stricter than [`Value::is_truthy`]: empty arrays and objects are treated
    /// as absent as well.
    pub fn is_present(&self) -> bool {
        match self {
            Value::Array(items) => !items.read().is_empty(),
            Value::Object(map) => !map.read().is_empty(),
            other => other.is_truthy(),
        }
    }

    /// Numeric view of the value, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(num) => num.as_f64(),
            _ => None,
        }
    }

    /// Integer view of the value, if it is an integral number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(num) => num.as_i64(),
            _ => None,
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// Deferred view of the value.
    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Value::Deferred(deferred) => Some(deferred),
            _ => None,
        }
    }

    /// Convert the value to JSON, truncating composites nested deeper than `depth`.
    ///
    /// Scalars always pass through, bytes become lowercase hex, and any
    /// composite reached at `depth <= 0` becomes `null`.
    pub fn json_safe(&self, depth: i64) -> Json {
        match self {
            Value::Bool(flag) => Json::Bool(*flag),
            Value::Number(num) => Json::Number(num.clone()),
            Value::String(text) => Json::String(text.clone()),
            Value::Bytes(bytes) => Json::String(hex::encode(bytes)),
            Value::Null => Json::Null,
            _ if depth <= 0 => Json::Null,
            Value::Array(items) => Json::Array(
                items
                    .read()
                    .iter()
                    .map(|item| item.json_safe(depth - 1))
                    .collect(),
            ),
            Value::Object(map) => Json::Object(
                map.read()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.json_safe(depth - 1)))
                    .collect(),
            ),
            Value::Host(object) => Json::Object(
                object
                    .entries()
                    .into_iter()
                    .map(|(key, value)| (key, value.json_safe(depth - 1)))
                    .collect(),
            ),
            Value::Function(_) | Value::Deferred(_) => Json::Object(Map::new()),
        }
    }

    /// Read `self[key]`. Missing entries read as `Null`.
    pub fn get_index(&self, key: &Value) -> Result<Value, EvalError> {
        let key = PropertyKey::from_value(key)?;
        match self {
            Value::Array(items) => {
                let items = items.read();
                if key.is_length() {
                    return Ok(Value::from(items.len()));
                }
                Ok(key
                    .as_index()
                    .and_then(|idx| items.get(idx).cloned())
                    .unwrap_or(Value::Null))
            }
            Value::Object(map) => Ok(map.read().get(&key.name()).cloned().unwrap_or(Value::Null)),
            Value::String(text) => {
                if key.is_length() {
                    return Ok(Value::from(text.chars().count()));
                }
                Ok(key
                    .as_index()
                    .and_then(|idx| text.chars().nth(idx))
                    .map(|ch| Value::String(ch.to_string()))
                    .unwrap_or(Value::Null))
            }
            Value::Bytes(bytes) => {
                if key.is_length() {
                    return Ok(Value::from(bytes.len()));
                }
                Ok(key
                    .as_index()
                    .and_then(|idx| bytes.get(idx))
                    .map(|byte| Value::from(*byte as u64))
                    .unwrap_or(Value::Null))
            }
            Value::Host(object) => object.get(&key),
            other => Err(EvalError::NotIndexable(other.describe())),
        }
    }

    /// Assign `self[key] = value`.
    pub fn set_index(&self, key: &Value, value: Value) -> Result<(), EvalError> {
        let key = PropertyKey::from_value(key)?;
        match self {
            Value::Array(items) => {
                let idx = key.as_index().ok_or_else(|| {
                    EvalError::NotAssignable(format!("array at key {}", key))
                })?;
                let mut items = items.write();
                if idx < items.len() {
                    items[idx] = value;
                    return Ok(());
                }
                if idx - items.len() > MAX_ARRAY_GAP {
                    return Err(EvalError::NotAssignable(format!(
                        "array of length {} at index {idx}",
                        items.len()
                    )));
                }
                items.resize(idx, Value::Null);
                items.push(value);
                Ok(())
            }
            Value::Object(map) => {
                map.write().insert(key.name(), value);
                Ok(())
            }
            Value::Host(object) => object.set(&key, value),
            other => Err(EvalError::NotAssignable(other.describe())),
        }
    }

    /// Invoke the value with `receiver` bound as `this`.
    pub fn call(&self, receiver: &Value, args: &[Value]) -> Result<Value, EvalError> {
        match self {
            Value::Function(function) => function.call(receiver, args),
            other => Err(EvalError::NotCallable(other.describe())),
        }
    }

    /// Compact rendering for error messages.
    pub fn describe(&self) -> String {
        let mut text = match self {
            Value::Function(function) => format!("function {}", function.name()),
            Value::Host(object) => object.describe(),
            Value::Deferred(_) => "deferred value".to_string(),
            other => other.json_safe(2).to_string(),
        };
        if text.len() > 50 {
            let cut = (0..=50).rev().find(|idx| text.is_char_boundary(*idx)).unwrap_or(0);
            text.truncate(cut);
            text.push_str("...");
        }
        text
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(flag) => write!(f, "Bool({flag})"),
            Value::Number(num) => write!(f, "Number({num})"),
            Value::String(text) => write!(f, "String({text:?})"),
            Value::Bytes(bytes) => write!(f, "Bytes({})", hex::encode(bytes)),
            Value::Array(items) => f.debug_list().entries(items.read().iter()).finish(),
            Value::Object(map) => f.debug_map().entries(map.read().iter()).finish(),
            Value::Function(function) => write!(f, "Function({})", function.name()),
            Value::Host(object) => write!(f, "Host({})", object.describe()),
            Value::Deferred(deferred) => write!(f, "{deferred:?}"),
        }
    }
}

/// Structural equality for data values, identity for functions, host
/// objects, and deferred values.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            },
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Value::Function(a), Value::Function(b)) => a.same_as(b),
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            (Value::Deferred(a), Value::Deferred(b)) => a.same_as(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<i64> for Value {
    fn from(num: i64) -> Self {
        Value::Number(num.into())
    }
}

impl From<u64> for Value {
    fn from(num: u64) -> Self {
        Value::Number(num.into())
    }
}

impl From<usize> for Value {
    fn from(num: usize) -> Self {
        Value::Number((num as u64).into())
    }
}

impl From<f64> for Value {
    fn from(num: f64) -> Self {
        Number::from_f64(num).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<&Json> for Value {
    fn from(json: &Json) -> Self {
        Value::from_json(json)
    }
}

/// Native function value. Called with the receiver and positional arguments.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    inner: Arc<NativeFn>,
}

impl Function {
    /// Wrap a closure as a callable value.
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            inner: Arc::new(f),
        }
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function.
    pub fn call(&self, receiver: &Value, args: &[Value]) -> Result<Value, EvalError> {
        (self.inner)(receiver, args)
    }

    /// Identity comparison.
    pub fn same_as(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

/// Property key derived from an evaluated index value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKey {
    /// Non-negative integer index.
    Index(usize),
    /// Named property.
    Name(String),
}

impl PropertyKey {
    /// Derive a key from an index value. Composites cannot be keys.
    pub fn from_value(value: &Value) -> Result<Self, EvalError> {
        match value {
            Value::String(text) => Ok(PropertyKey::Name(text.clone())),
            Value::Number(num) => {
                if let Some(idx) = num.as_u64().and_then(|idx| usize::try_from(idx).ok()) {
                    return Ok(PropertyKey::Index(idx));
                }
                match num.as_f64() {
                    Some(n) if (0.0..MAX_SAFE_INTEGER).contains(&n) && n.fract() == 0.0 => {
                        Ok(PropertyKey::Index(n as usize))
                    }
                    _ => Ok(PropertyKey::Name(num.to_string())),
                }
            }
            Value::Bool(flag) => Ok(PropertyKey::Name(flag.to_string())),
            Value::Null => Ok(PropertyKey::Name("null".to_string())),
            other => Err(EvalError::InvalidKey(other.describe())),
        }
    }

    /// Integer view of the key; numeric names count as indices.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PropertyKey::Index(idx) => Some(*idx),
            PropertyKey::Name(name) => name.parse().ok(),
        }
    }

    /// String view of the key.
    pub fn name(&self) -> String {
        match self {
            PropertyKey::Index(idx) => idx.to_string(),
            PropertyKey::Name(name) => name.clone(),
        }
    }

    fn is_length(&self) -> bool {
        matches!(self, PropertyKey::Name(name) if name == "length")
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Index(idx) => write!(f, "{idx}"),
            PropertyKey::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// Decode a hex string into bytes. Odd-length input is rejected.
pub fn from_hex(text: &str) -> Result<Vec<u8>, EvalError> {
    Ok(hex::decode(text)?)
}

/// Encode bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
