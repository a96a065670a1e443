//! Error classification for REST and storage requests.

use serde_json::Value;
use thiserror::Error;

/// Broad category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Status 0 or a connection-level failure. Only retried on an explicit resume.
    TransientNetwork,
    /// 4xx with a JSON body carrying a message.
    ServerValidation,
    /// Any other non-success status.
    Server,
    /// The request could not be built or the response could not be decoded.
    Protocol,
}

/// Errors produced by a [`Transport`](super::Transport).
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// The request never reached the server (status 0 in browser terms).
    #[error("connection failed: {0}")]
    Connection(String),
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {}", message.as_deref().unwrap_or("request failed"))]
    Status {
        status: u16,
        message: Option<String>,
        identifier: Option<String>,
        body: Option<Value>,
    },
    /// The response body was not what the caller expected.
    #[error("invalid response body: {0}")]
    Decode(String),
    /// The request could not be constructed.
    #[error("invalid request: {0}")]
    Request(String),
}

impl HttpError {
    /// Build an error from a non-success status and its raw body.
    ///
    /// Status 0 is treated as a connection failure. A JSON body contributes its
    /// `message` and `identifier` fields when present.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        if status == 0 {
            return HttpError::Connection("no response from server".to_string());
        }

        let body: Option<Value> = serde_json::from_slice(body).ok();
        let field = |name: &str| {
            body.as_ref()
                .and_then(|b| b.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        HttpError::Status {
            status,
            message: field("message"),
            identifier: field("identifier"),
            body,
        }
    }

    /// HTTP status, with 0 for connection failures. `None` when not applicable.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Connection(_) => Some(0),
            HttpError::Status { status, .. } => Some(*status),
            HttpError::Decode(_) | HttpError::Request(_) => None,
        }
    }

    /// Message supplied by the server in its JSON error body.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            HttpError::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// Machine-readable identifier supplied by the server, if any.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            HttpError::Status { identifier, .. } => identifier.as_deref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HttpError::Connection(_) => ErrorKind::TransientNetwork,
            HttpError::Status {
                status, message, ..
            } if (400..500).contains(status) && message.is_some() => ErrorKind::ServerValidation,
            HttpError::Status { .. } => ErrorKind::Server,
            HttpError::Decode(_) | HttpError::Request(_) => ErrorKind::Protocol,
        }
    }

    pub fn is_connection(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            HttpError::Request(err.to_string())
        } else if err.is_decode() {
            HttpError::Decode(err.to_string())
        } else {
            // Connect, timeout and body errors all mean no usable response arrived.
            HttpError::Connection(err.to_string())
        }
    }
}
