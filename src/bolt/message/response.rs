//! Bolt protocol response messages.
//!
//! Response messages are sent from the server to the client. Unknown
//! signatures decode into [`BoltResponse::Generic`] so a newer server does
//! not break framing.

use std::collections::HashMap;

use super::tag;
use crate::bolt::packstream::{PackStreamError, Structure, Value};

/// All Bolt response messages.
#[derive(Debug, Clone)]
pub enum BoltResponse {
    /// SUCCESS - operation completed, with metadata
    Success(SuccessMessage),
    /// RECORD - one result row
    Record(RecordMessage),
    /// FAILURE - operation failed (code + message)
    Failure(FailureMessage),
    /// IGNORED - message ignored due to a prior failure
    Ignored,
    /// Any structure with an unknown signature
    Generic(Structure),
}

impl BoltResponse {
    /// Get the message tag.
    pub fn tag(&self) -> u8 {
        match self {
            BoltResponse::Success(_) => tag::SUCCESS,
            BoltResponse::Record(_) => tag::RECORD,
            BoltResponse::Failure(_) => tag::FAILURE,
            BoltResponse::Ignored => tag::IGNORED,
            BoltResponse::Generic(s) => s.tag,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BoltResponse::Success(_) => "SUCCESS",
            BoltResponse::Record(_) => "RECORD",
            BoltResponse::Failure(_) => "FAILURE",
            BoltResponse::Ignored => "IGNORED",
            BoltResponse::Generic(_) => "GENERIC",
        }
    }

    /// Check if this is a success response.
    pub fn is_success(&self) -> bool {
        matches!(self, BoltResponse::Success(_))
    }

    /// Check if this is a failure response.
    pub fn is_failure(&self) -> bool {
        matches!(self, BoltResponse::Failure(_))
    }

    /// Check if this is a record response.
    pub fn is_record(&self) -> bool {
        matches!(self, BoltResponse::Record(_))
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        match self {
            BoltResponse::Success(msg) => msg.to_structure(),
            BoltResponse::Record(msg) => msg.to_structure(),
            BoltResponse::Failure(msg) => msg.to_structure(),
            BoltResponse::Ignored => Structure::new(tag::IGNORED, vec![]),
            BoltResponse::Generic(s) => s.clone(),
        }
    }

    /// Parse from PackStream structure, dispatching by signature.
    pub fn from_structure(s: Structure) -> Result<Self, PackStreamError> {
        match s.tag {
            tag::SUCCESS => Ok(BoltResponse::Success(SuccessMessage::from_structure(&s)?)),
            tag::RECORD => Ok(BoltResponse::Record(RecordMessage::from_structure(&s)?)),
            tag::FAILURE => Ok(BoltResponse::Failure(FailureMessage::from_structure(&s)?)),
            tag::IGNORED => Ok(BoltResponse::Ignored),
            _ => Ok(BoltResponse::Generic(s)),
        }
    }
}

/// SUCCESS message - operation completed with metadata.
#[derive(Debug, Clone, Default)]
pub struct SuccessMessage {
    /// Response metadata
    pub metadata: HashMap<String, Value>,
}

impl SuccessMessage {
    /// Create a SUCCESS message with empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a SUCCESS message with metadata.
    pub fn with_metadata(metadata: HashMap<String, Value>) -> Self {
        Self { metadata }
    }

    /// Add a metadata entry.
    pub fn add(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Get a metadata entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Column names from a RUN SUCCESS.
    pub fn fields(&self) -> Option<Vec<String>> {
        self.metadata.get("fields").and_then(|v| {
            v.as_list().map(|list| {
                list.iter()
                    .map(|item| item.as_str().unwrap_or_default().to_string())
                    .collect()
            })
        })
    }

    /// Whether more records remain after this PULL batch.
    pub fn has_more(&self) -> bool {
        self.metadata
            .get("has_more")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Query statistics map.
    pub fn stats(&self) -> Option<&HashMap<String, Value>> {
        self.metadata.get("stats").and_then(|v| v.as_map())
    }

    /// Transactional bookmark.
    pub fn bookmark(&self) -> Option<&str> {
        self.metadata.get("bookmark").and_then(|v| v.as_str())
    }

    /// Server agent string (HELLO SUCCESS).
    pub fn server(&self) -> Option<&str> {
        self.metadata.get("server").and_then(|v| v.as_str())
    }

    /// Database the query ran against.
    pub fn db(&self) -> Option<&str> {
        self.metadata.get("db").and_then(|v| v.as_str())
    }

    /// Time until the result was available (ms).
    pub fn t_first(&self) -> Option<i64> {
        self.metadata.get("t_first").and_then(|v| v.as_int())
    }

    /// Time until the result was consumed (ms).
    pub fn t_last(&self) -> Option<i64> {
        self.metadata.get("t_last").and_then(|v| v.as_int())
    }

    /// Server notifications, raw.
    pub fn notifications(&self) -> Option<&[Value]> {
        self.metadata.get("notifications").and_then(|v| v.as_list())
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        Structure::new(tag::SUCCESS, vec![Value::Map(self.metadata.clone())])
    }

    /// Parse from PackStream structure.
    pub fn from_structure(s: &Structure) -> Result<Self, PackStreamError> {
        if s.tag != tag::SUCCESS {
            return Err(PackStreamError::InvalidStructure(
                "Expected SUCCESS tag".to_string(),
            ));
        }

        let metadata = s
            .fields
            .first()
            .and_then(|v| v.as_map())
            .cloned()
            .unwrap_or_default();

        Ok(Self { metadata })
    }

    /// Build a RUN SUCCESS (used by test servers).
    pub fn run_success(fields: Vec<&str>) -> Self {
        let mut msg = Self::new();
        msg.add(
            "fields",
            Value::List(fields.into_iter().map(Value::from).collect()),
        );
        msg.add("t_first", Value::Integer(1));
        msg
    }

    /// Build a PULL SUCCESS (used by test servers).
    pub fn streaming_success(has_more: bool, bookmark: Option<&str>) -> Self {
        let mut msg = Self::new();
        if has_more {
            msg.add("has_more", Value::Boolean(true));
        }
        if let Some(bm) = bookmark {
            msg.add("bookmark", Value::from(bm));
        }
        msg
    }
}

/// RECORD message - one result row.
#[derive(Debug, Clone, Default)]
pub struct RecordMessage {
    /// Row values, positionally aligned with the RUN SUCCESS `fields`
    pub values: Vec<Value>,
}

impl RecordMessage {
    /// Create a new RECORD message.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get the value count.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        Structure::new(tag::RECORD, vec![Value::List(self.values.clone())])
    }

    /// Parse from PackStream structure.
    pub fn from_structure(s: &Structure) -> Result<Self, PackStreamError> {
        if s.tag != tag::RECORD {
            return Err(PackStreamError::InvalidStructure(
                "Expected RECORD tag".to_string(),
            ));
        }

        let values = match s.fields.first() {
            Some(Value::List(list)) => list.clone(),
            Some(_) => {
                return Err(PackStreamError::InvalidStructure(
                    "RECORD values must be a list".to_string(),
                ))
            }
            None => Vec::new(),
        };

        Ok(Self { values })
    }
}

/// FAILURE message - operation failed.
#[derive(Debug, Clone)]
pub struct FailureMessage {
    /// Server error code, e.g. "Neo.ClientError.Statement.SyntaxError"
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl FailureMessage {
    /// Create a new FAILURE message.
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        let mut metadata = HashMap::new();
        metadata.insert("code".to_string(), Value::from(self.code.as_str()));
        metadata.insert("message".to_string(), Value::from(self.message.as_str()));
        Structure::new(tag::FAILURE, vec![Value::Map(metadata)])
    }

    /// Parse from PackStream structure.
    pub fn from_structure(s: &Structure) -> Result<Self, PackStreamError> {
        if s.tag != tag::FAILURE {
            return Err(PackStreamError::InvalidStructure(
                "Expected FAILURE tag".to_string(),
            ));
        }

        let metadata = s.fields.first().and_then(|v| v.as_map()).ok_or_else(|| {
            PackStreamError::InvalidStructure("FAILURE requires a metadata map".to_string())
        })?;

        let code = metadata
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let message = metadata
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self { code, message })
    }
}

impl std::fmt::Display for FailureMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_roundtrip() {
        let mut msg = SuccessMessage::new();
        msg.add("server", Value::from("Neo4j/5.12.0"));
        msg.add("bookmark", Value::from("FB:kcwQ"));

        let parsed = SuccessMessage::from_structure(&msg.to_structure()).unwrap();
        assert_eq!(parsed.server(), Some("Neo4j/5.12.0"));
        assert_eq!(parsed.bookmark(), Some("FB:kcwQ"));
    }

    #[test]
    fn test_success_fields() {
        let msg = SuccessMessage::run_success(vec!["name", "age"]);
        assert_eq!(msg.fields().unwrap(), vec!["name", "age"]);
        assert_eq!(msg.t_first(), Some(1));
    }

    #[test]
    fn test_success_has_more() {
        let msg = SuccessMessage::streaming_success(true, None);
        assert!(msg.has_more());
        assert!(msg.bookmark().is_none());

        let msg = SuccessMessage::streaming_success(false, Some("bm-7"));
        assert!(!msg.has_more());
        assert_eq!(msg.bookmark(), Some("bm-7"));
    }

    #[test]
    fn test_record_roundtrip() {
        let msg = RecordMessage::new(vec![Value::from("Alice"), Value::Integer(30)]);
        assert_eq!(msg.len(), 2);
        assert!(!msg.is_empty());

        let parsed = RecordMessage::from_structure(&msg.to_structure()).unwrap();
        assert_eq!(parsed.values[0].as_str(), Some("Alice"));
        assert_eq!(parsed.values[1].as_int(), Some(30));
    }

    #[test]
    fn test_record_rejects_non_list() {
        let s = Structure::new(tag::RECORD, vec![Value::Integer(1)]);
        assert!(RecordMessage::from_structure(&s).is_err());
    }

    #[test]
    fn test_failure_roundtrip() {
        let msg = FailureMessage::new(
            "Neo.ClientError.Statement.SyntaxError",
            "Invalid input 'RETRN'",
        );
        let parsed = FailureMessage::from_structure(&msg.to_structure()).unwrap();
        assert_eq!(parsed.code, msg.code);
        assert_eq!(parsed.message, msg.message);
        assert!(parsed.to_string().contains("SyntaxError"));
    }

    #[test]
    fn test_dispatch_by_signature() {
        let success = BoltResponse::from_structure(SuccessMessage::new().to_structure()).unwrap();
        assert!(success.is_success());
        assert_eq!(success.name(), "SUCCESS");

        let record =
            BoltResponse::from_structure(RecordMessage::new(vec![]).to_structure()).unwrap();
        assert!(record.is_record());

        let failure = BoltResponse::from_structure(
            FailureMessage::new("Neo.ClientError.Security.Unauthorized", "denied").to_structure(),
        )
        .unwrap();
        assert!(failure.is_failure());

        let ignored =
            BoltResponse::from_structure(Structure::new(tag::IGNORED, vec![])).unwrap();
        assert!(matches!(ignored, BoltResponse::Ignored));
    }

    #[test]
    fn test_unknown_signature_is_generic() {
        let response =
            BoltResponse::from_structure(Structure::new(0x42, vec![Value::Integer(7)])).unwrap();
        match &response {
            BoltResponse::Generic(s) => {
                assert_eq!(s.tag, 0x42);
                assert_eq!(s.fields[0].as_int(), Some(7));
            }
            other => panic!("expected generic, got {:?}", other),
        }
        assert_eq!(response.tag(), 0x42);
        assert_eq!(response.name(), "GENERIC");
    }
}
