//! Thin JSON-over-HTTP wrapper around `reqwest`.

use crate::errors::RequestError;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Message used when an error response carries no `error` field.
pub const DEFAULT_ERROR_MESSAGE: &str = "Request failed";

/// Connect timeout for collaborator calls.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Only POST and PUT carry a body.
    #[must_use]
    pub fn has_body(self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }

    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One request against the backend.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    /// Path appended to the base URL, e.g. `/meetings/abc`.
    pub endpoint: String,
    pub data: Option<serde_json::Value>,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    #[must_use]
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            data: None,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    #[must_use]
    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Put, endpoint)
    }

    #[must_use]
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Post, endpoint)
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// HTTP client bound to a base URL.
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    http: reqwest::Client,
}

impl RestClient {
    /// # Errors
    ///
    /// Returns `RequestError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RequestError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RequestError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request and decode the JSON response.
    ///
    /// # Errors
    ///
    /// - `RequestError::InvalidUrl` if base URL + endpoint does not parse
    /// - `RequestError::Http` on transport failure
    /// - `RequestError::Status` on non-2xx, with the body's `error` message
    /// - `RequestError::Decode` if the body is not the expected JSON
    pub async fn request<T: DeserializeOwned>(
        &self,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let url = format!("{}{}", self.base_url, options.endpoint);
        let url =
            url::Url::parse(&url).map_err(|e| RequestError::InvalidUrl(format!("{url}: {e}")))?;

        let mut builder = self
            .http
            .request(options.method.as_reqwest(), url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if !options.params.is_empty() {
            builder = builder.query(&options.params);
        }
        for (key, value) in &options.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if options.method.has_body() {
            if let Some(data) = &options.data {
                builder = builder.json(data);
            }
        }

        debug!(
            target: "meet.api",
            method = ?options.method,
            endpoint = %options.endpoint,
            "Sending request"
        );

        let response = builder.send().await.map_err(|e| {
            warn!(target: "meet.api", endpoint = %options.endpoint, error = %e, "Request failed");
            RequestError::Http(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());

            warn!(
                target: "meet.api",
                endpoint = %options.endpoint,
                status = status.as_u16(),
                message = %message,
                "Request returned error status"
            );
            return Err(RequestError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RequestError::Decode(e.to_string()))
    }
}
