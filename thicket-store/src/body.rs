//! Document bodies.
//!
//! The engine treats bodies as opaque bytes. The only check it performs is
//! well-formedness: a non-empty body must be a JSON object whose top-level
//! field names do not use the reserved `_` prefix. Empty bodies are stubs
//! and tombstones.

use serde::Serialize;
use std::fmt;

/// Serialized document content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentBody(Vec<u8>);

impl DocumentBody {
    /// Body with no content (stubs, tombstones).
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw bytes without validating them.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Serialize any value as a JSON body.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, InvalidBody> {
        serde_json::to_vec(value)
            .map(Self)
            .map_err(|e| InvalidBody(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Parse the body as JSON. `None` for an empty body.
    pub fn to_json(&self) -> Result<Option<serde_json::Value>, InvalidBody> {
        if self.0.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&self.0)
            .map(Some)
            .map_err(|e| InvalidBody(e.to_string()))
    }

    /// Check the body is well-formed content.
    pub fn validate(&self) -> Result<(), InvalidBody> {
        let Some(value) = self.to_json()? else {
            return Ok(());
        };
        let object = value
            .as_object()
            .ok_or_else(|| InvalidBody("body must be a JSON object".into()))?;
        if let Some(field) = object.keys().find(|k| k.starts_with('_')) {
            return Err(InvalidBody(format!("field name '{field}' uses the reserved '_' prefix")));
        }
        Ok(())
    }
}

impl From<Vec<u8>> for DocumentBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for DocumentBody {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// A body that is not well-formed content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidBody(pub String);

impl fmt::Display for InvalidBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid document body: {}", self.0)
    }
}

impl std::error::Error for InvalidBody {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_body_is_valid() {
        assert!(DocumentBody::empty().validate().is_ok());
        assert!(DocumentBody::empty().to_json().unwrap().is_none());
    }

    #[test]
    fn test_json_object_is_valid() {
        let body = DocumentBody::from_json(&json!({"title": "hello", "n": 3})).unwrap();
        assert!(body.validate().is_ok());
        assert_eq!(body.to_json().unwrap().unwrap()["title"], "hello");
    }

    #[test]
    fn test_rejects_non_object() {
        let body = DocumentBody::from_json(&json!([1, 2, 3])).unwrap();
        assert!(body.validate().is_err());
        assert!(DocumentBody::from_bytes(b"not json".to_vec()).validate().is_err());
    }

    #[test]
    fn test_rejects_reserved_field() {
        let body = DocumentBody::from_json(&json!({"_rev": "1-a"})).unwrap();
        let err = body.validate().unwrap_err();
        assert!(err.to_string().contains("_rev"));

        // Only top-level names are reserved.
        let nested = DocumentBody::from_json(&json!({"inner": {"_x": 1}})).unwrap();
        assert!(nested.validate().is_ok());
    }
}
