//! JSON codec between envelopes and wire text.

use serde::Serialize;
use serde_json::Value as Json;
use std::fmt;
use std::sync::Arc;

use super::error::CodecError;

/// Callback told about codec failures before the error is returned.
pub type ErrorReporter = Arc<dyn Fn(&CodecError) + Send + Sync>;

const EXCERPT: usize = 50;

/// Encodes envelopes to text and decodes text to envelopes.
#[derive(Clone, Default)]
pub struct JsonCodec {
    on_error: Option<ErrorReporter>,
}

impl JsonCodec {
    /// Codec without an error reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that reports failures to `on_error`.
    pub fn with_reporter(on_error: ErrorReporter) -> Self {
        Self {
            on_error: Some(on_error),
        }
    }

    /// Parse wire text.
    pub fn decode(&self, text: &str) -> Result<Json, CodecError> {
        serde_json::from_str(text).map_err(|err| {
            tracing::debug!(error = %err, "decode failed");
            self.fail(CodecError::Decode(excerpt(text)))
        })
    }

    /// Serialise an envelope. Nothing is produced unless the whole envelope
    /// serialises.
    pub fn encode<T: Serialize + ?Sized>(&self, envelope: &T) -> Result<String, CodecError> {
        serde_json::to_string(envelope)
            .map_err(|err| self.fail(CodecError::Encode(err.to_string())))
    }

    fn fail(&self, err: CodecError) -> CodecError {
        if let Some(on_error) = &self.on_error {
            on_error(&err);
        }
        err
    }
}

impl fmt::Debug for JsonCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("reporting", &self.on_error.is_some())
            .finish()
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    fn reporting_codec() -> (JsonCodec, Arc<Mutex<Vec<CodecError>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let codec = JsonCodec::with_reporter(Arc::new(move |err: &CodecError| {
            sink.lock().push(err.clone())
        }));
        (codec, seen)
    }

    #[test]
    fn decodes_and_encodes_envelopes() {
        let codec = JsonCodec::new();
        let envelope = json!(["G", "oid", ["L", [1, 2]], 3]);
        let text = codec.encode(&envelope).unwrap();
        assert_eq!(codec.decode(&text).unwrap(), envelope);
    }

    #[test]
    fn decode_failure_is_reported_with_excerpt() {
        let (codec, seen) = reporting_codec();
        let garbage = format!("[\"E\", {}", "x".repeat(100));
        let err = codec.decode(&garbage).unwrap_err();
        match &err {
            CodecError::Decode(text) => assert_eq!(text.chars().count(), 50),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(*seen.lock(), vec![err]);
    }

    #[test]
    fn encode_failure_is_reported() {
        let (codec, seen) = reporting_codec();
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON");
        assert!(matches!(codec.encode(&bad), Err(CodecError::Encode(_))));
        assert_eq!(seen.lock().len(), 1);
    }
}
