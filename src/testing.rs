//! Scripted in-memory transport for tests of collections and uploads.
//!
//! Public so downstream crates can drive [`Collection`](crate::Collection)
//! and [`Uploader`](crate::Uploader) against canned responses.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::http::{ApiRequest, ApiResponse, HttpError, RequestBody, Target, Transport};
use crate::models::Record;

type Handler = dyn Fn(&ApiRequest) -> Result<ApiResponse, HttpError> + Send + Sync;

/// A request as seen by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub target: Target,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl RecordedRequest {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Path or URL of the request.
    pub fn target_str(&self) -> String {
        self.target.to_string()
    }

    pub fn body_len(&self) -> Option<u64> {
        self.body.len()
    }

    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            RequestBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Transport that answers every request with a caller-supplied handler and
/// records what it was asked.
///
/// Byte bodies report a single progress callback of `(len, len)` before the
/// handler runs.
#[derive(Clone)]
pub struct MockTransport {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, HttpError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Serve `records` from any GET listing, honoring `limit` and `offset`.
    ///
    /// `limit = 0` or a missing limit returns everything from `offset` on.
    pub fn listing(records: Vec<Record>) -> Self {
        Self::new(move |req| {
            let offset: usize = req
                .query_value("offset")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let limit: usize = req
                .query_value("limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            let start = offset.min(records.len());
            let end = if limit == 0 {
                records.len()
            } else {
                (start + limit).min(records.len())
            };
            let page: Vec<Value> = records[start..end]
                .iter()
                .cloned()
                .map(Record::into_value)
                .collect();
            Ok(ApiResponse::json_body(&Value::Array(page)))
        })
    }

    /// Every request sent so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requests whose path or URL contains `needle`.
    pub fn requests_to(&self, needle: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.target_str().contains(needle))
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                method: request.method.clone(),
                target: request.target.clone(),
                query: request.query.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
            });

        if let (Some(callback), RequestBody::Bytes(data)) = (&request.on_progress, &request.body) {
            let len = data.len() as u64;
            callback(len, len);
        }

        (self.handler)(&request)
    }
}

/// Records named `{prefix}0 .. {prefix}{count-1}` with matching `_id`s.
pub fn named_records(prefix: &str, count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            let mut fields = serde_json::Map::new();
            fields.insert("_id".into(), Value::String(format!("id{}", i)));
            fields.insert("name".into(), Value::String(format!("{}{}", prefix, i)));
            Record::new(fields)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_honors_limit_and_offset() {
        let transport = MockTransport::listing(named_records("r", 5));

        let resp = transport
            .send(ApiRequest::get("item").query("limit", 2).query("offset", 3))
            .await
            .unwrap();
        let page: Vec<Record> = resp.json().unwrap();
        let names: Vec<_> = page.iter().filter_map(Record::name).collect();
        assert_eq!(names, vec!["r3", "r4"]);

        let resp = transport
            .send(ApiRequest::get("item").query("limit", 0).query("offset", 1))
            .await
            .unwrap();
        let page: Vec<Record> = resp.json().unwrap();
        assert_eq!(page.len(), 4);
        assert_eq!(transport.request_count(), 2);
    }
}
