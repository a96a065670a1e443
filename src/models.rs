//! Records exchanged with the server.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An opaque server document (folder, item, file, ...).
///
/// Only `_id` is interpreted; everything else belongs to whoever reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a record from a JSON value, `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// The unique identifier (`_id`).
    pub fn id(&self) -> Option<&str> {
        self.get_str("_id")
    }

    /// The `name` field, which most listing endpoints carry.
    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    /// The `_modelType` field (`file`, `item`, `folder`, `upload`, ...).
    pub fn model_type(&self) -> Option<&str> {
        self.get_str("_modelType")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A pre-signed request the server hands out for direct-to-storage transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Storage details attached to an upload whose behavior is `s3`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageInfo {
    /// Whether the file goes up as a multipart upload.
    #[serde(default)]
    pub chunked: bool,
    /// Part size chosen by the server.
    #[serde(rename = "chunkLength", default)]
    pub chunk_length: Option<u64>,
    /// Signed single-shot PUT, or the multipart initiate request.
    pub request: SignedRequest,
}

/// Upload document returned when an upload is initiated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub behavior: Option<String>,
    #[serde(default)]
    pub s3: Option<StorageInfo>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub received: Option<u64>,
}

/// Reply of the chunk endpoint when it authorizes a storage part.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PartAuthorization {
    pub s3: StorageInfo,
}

/// Reply of the offset endpoint on the server-mediated path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResumeOffset {
    pub offset: u64,
}
