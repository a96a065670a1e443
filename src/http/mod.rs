//! The HTTP request primitive shared by listing and upload code.
//!
//! Everything that talks to the server or to a storage provider goes through
//! the [`Transport`] trait, so components can be driven by the real
//! [`RestClient`] or by a scripted fake in tests.

mod client;
mod error;

pub use client::{resolve_user_agent, RestClient};
pub use error::{ErrorKind, HttpError};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Callback invoked while a request body is sent: `(loaded, total)` bytes of the body.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Where a request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Path relative to the API root, e.g. `file/chunk`.
    Path(String),
    /// Absolute URL, used for signed storage requests.
    Url(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Path(path) => write!(f, "{}", path),
            Target::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Bytes(Vec<u8>),
    Text(String),
}

impl RequestBody {
    /// Number of bytes this body puts on the wire, when known up front.
    pub fn len(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(data) => Some(data.len() as u64),
            RequestBody::Text(text) => Some(text.len() as u64),
            RequestBody::Json(_) | RequestBody::Form(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// A single request to the server or a storage provider.
#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub target: Target,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub on_progress: Option<ProgressFn>,
}

impl ApiRequest {
    pub fn new(method: Method, target: Target) -> Self {
        Self {
            method,
            target,
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            on_progress: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, Target::Path(path.to_string()))
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, Target::Path(path.to_string()))
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::PUT, Target::Path(path.to_string()))
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, Target::Path(path.to_string()))
    }

    /// Request to an absolute URL (signed storage requests).
    pub fn absolute(method: Method, url: &str) -> Self {
        Self::new(method, Target::Url(url.to_string()))
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: ToString,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(pairs);
        self
    }

    pub fn bytes(mut self, data: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes(data);
        self
    }

    pub fn text(mut self, text: String) -> Self {
        self.body = RequestBody::Text(text);
        self
    }

    pub fn on_progress(mut self, callback: ProgressFn) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// First query value for `key`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the request targets the API (and so carries the session token).
    pub fn is_api_request(&self) -> bool {
        matches!(self.target, Target::Path(_))
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// A successful response. Non-success statuses surface as [`HttpError::Status`].
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// 200 response carrying a JSON document.
    pub fn json_body(value: &Value) -> Self {
        Self::new(200)
            .with_header("content-type", "application/json")
            .with_body(value.to_string().into_bytes())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::Decode(e.to_string()))
    }

    pub fn text(&self) -> Result<&str, HttpError> {
        std::str::from_utf8(&self.body).map_err(|e| HttpError::Decode(e.to_string()))
    }
}

/// Sends requests on behalf of the listing and upload components.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request. Only 2xx responses come back as `Ok`.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError>;
}
