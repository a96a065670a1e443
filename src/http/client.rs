//! `reqwest`-backed transport for the REST API and signed storage URLs.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client};
use tracing::{debug, trace};
use url::Url;

use super::{ApiRequest, ApiResponse, HttpError, ProgressFn, RequestBody, Target, Transport};
use crate::config::{Settings, DEFAULT_USER_AGENT};
use crate::context::SessionHandle;

/// Header carrying the session token on API requests.
pub const TOKEN_HEADER: &str = "Girder-Token";

/// Byte bodies are streamed in slices of this size so progress can be reported.
const BODY_SLICE: usize = 64 * 1024;

/// Resolve user agent from config value.
/// - None => default girder-client user agent
/// - other => custom user agent string
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config {
        None | Some("") => DEFAULT_USER_AGENT.to_string(),
        Some(custom) => custom.to_string(),
    }
}

/// HTTP client bound to one API root.
///
/// Relative targets are resolved against the API root and carry the current
/// session token. Absolute targets (signed storage URLs) are sent as-is,
/// without the token.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    api_root: Url,
    session: SessionHandle,
}

impl RestClient {
    /// Create a new client for `api_url`.
    pub fn new(api_url: &str, timeout: Duration, session: SessionHandle) -> Result<Self, HttpError> {
        Self::with_user_agent(api_url, timeout, session, None)
    }

    /// Create a new client with custom user agent configuration.
    pub fn with_user_agent(
        api_url: &str,
        timeout: Duration,
        session: SessionHandle,
        user_agent_config: Option<&str>,
    ) -> Result<Self, HttpError> {
        let user_agent = resolve_user_agent(user_agent_config);
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            api_root: normalize_api_root(api_url)?,
            session,
        })
    }

    /// Create a client from loaded settings.
    pub fn from_settings(settings: &Settings, session: SessionHandle) -> Result<Self, HttpError> {
        Self::with_user_agent(
            &settings.api_url,
            Duration::from_secs(settings.request_timeout),
            session,
            Some(&settings.user_agent),
        )
    }

    /// The API root every relative path is resolved against.
    pub fn api_root(&self) -> &Url {
        &self.api_root
    }

    fn resolve(&self, target: &Target) -> Result<Url, HttpError> {
        match target {
            Target::Path(path) => self
                .api_root
                .join(path.trim_start_matches('/'))
                .map_err(|e| HttpError::Request(format!("bad path {}: {}", path, e))),
            Target::Url(url) => {
                Url::parse(url).map_err(|e| HttpError::Request(format!("bad url {}: {}", url, e)))
            }
        }
    }
}

#[async_trait]
impl Transport for RestClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
        let ApiRequest {
            method,
            target,
            query,
            headers,
            body,
            on_progress,
        } = request;

        let url = self.resolve(&target)?;
        let mut builder = self.client.request(method.clone(), url.clone());

        if !query.is_empty() {
            builder = builder.query(&query);
        }
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if matches!(target, Target::Path(_)) {
            if let Some(token) = self.session.token().await {
                builder = builder.header(TOKEN_HEADER, token);
            }
        }

        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Text(text) => builder.body(text),
            RequestBody::Bytes(data) => match on_progress {
                Some(callback) => {
                    let len = data.len();
                    builder
                        .header(CONTENT_LENGTH, len)
                        .body(progress_body(data, callback))
                }
                None => builder.body(data),
            },
        };

        trace!("{} {}", method, url);
        let start = Instant::now();
        let response = builder.send().await?;
        let status = response.status().as_u16();

        // Extract response headers
        let mut response_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                response_headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        let body = response.bytes().await?.to_vec();
        debug!(
            "{} {} -> {} ({} bytes, {}ms)",
            method,
            url.path(),
            status,
            body.len(),
            start.elapsed().as_millis()
        );

        if !(200..300).contains(&status) {
            return Err(HttpError::from_status(status, &body));
        }

        Ok(ApiResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

/// Ensure the API root ends with a slash so relative joins append to it.
fn normalize_api_root(api_url: &str) -> Result<Url, HttpError> {
    let with_slash = if api_url.ends_with('/') {
        api_url.to_string()
    } else {
        format!("{}/", api_url)
    };
    Url::parse(&with_slash).map_err(|e| HttpError::Request(format!("bad API url {}: {}", api_url, e)))
}

/// Stream `data` in slices, reporting cumulative bytes handed to the connection.
fn progress_body(data: Vec<u8>, on_progress: ProgressFn) -> Body {
    let total = data.len() as u64;
    let slices: Vec<Vec<u8>> = data.chunks(BODY_SLICE).map(|s| s.to_vec()).collect();
    let mut loaded = 0u64;
    let stream = futures::stream::iter(slices.into_iter().map(move |slice| {
        loaded += slice.len() as u64;
        on_progress(loaded, total);
        Ok::<_, std::io::Error>(slice)
    }));
    Body::wrap_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_user_agent_default() {
        let ua = resolve_user_agent(None);
        assert!(ua.starts_with("girder-client/"));
        assert_eq!(resolve_user_agent(Some("")), ua);
    }

    #[test]
    fn test_resolve_user_agent_custom() {
        let ua = resolve_user_agent(Some("MyBot/1.0"));
        assert_eq!(ua, "MyBot/1.0");
    }

    #[test]
    fn test_relative_paths_join_under_api_root() {
        let client = RestClient::new(
            "https://data.example.org/api/v1",
            Duration::from_secs(5),
            SessionHandle::default(),
        )
        .unwrap();

        let url = client.resolve(&Target::Path("file/chunk".into())).unwrap();
        assert_eq!(url.as_str(), "https://data.example.org/api/v1/file/chunk");

        let url = client.resolve(&Target::Path("/item".into())).unwrap();
        assert_eq!(url.as_str(), "https://data.example.org/api/v1/item");
    }

    #[test]
    fn test_absolute_targets_are_untouched() {
        let client = RestClient::new(
            "https://data.example.org/api/v1/",
            Duration::from_secs(5),
            SessionHandle::default(),
        )
        .unwrap();

        let signed = "https://bucket.s3.amazonaws.com/key?partNumber=1&X-Amz-Signature=abc";
        let url = client.resolve(&Target::Url(signed.into())).unwrap();
        assert_eq!(url.as_str(), signed);
    }

    #[test]
    fn test_bad_api_root_is_rejected() {
        let result = RestClient::new("not a url", Duration::from_secs(5), SessionHandle::default());
        assert!(matches!(result, Err(HttpError::Request(_))));
    }
}
