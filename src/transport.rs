//! HTTP transport against the catalog service.
//!
//! One blocking client shared by every request. Every call carries an
//! `x-request-context` header describing who is asking and why; responses
//! surface the `ETag` version token. Failures are normalized into
//! [`TransportError`] values, never raw transport panics.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use crate::error::TransportError;

/// Default timeout for catalog requests (30 seconds).
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the request context JSON.
pub const CONTEXT_HEADER: &str = "x-request-context";

/// Logging context attached to every request.
///
/// Caller parameters are merged over the defaults; on key collision the
/// caller wins.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub catalog: String,
    pub schema_table: String,
    pub action: String,
    pub extra: serde_json::Map<String, Value>,
}

impl RequestContext {
    pub fn new(
        catalog: impl Into<String>,
        schema_table: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        RequestContext {
            catalog: catalog.into(),
            schema_table: schema_table.into(),
            action: action.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Same context with a different action label.
    pub fn with_action(&self, action: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.action = action.into();
        next
    }

    /// URL-encoded JSON for the context header.
    pub fn header_value(&self) -> String {
        let mut merged = serde_json::Map::new();
        merged.insert("catalog".to_string(), Value::String(self.catalog.clone()));
        merged.insert(
            "schema_table".to_string(),
            Value::String(self.schema_table.clone()),
        );
        merged.insert("action".to_string(), Value::String(self.action.clone()));
        for (key, value) in &self.extra {
            merged.insert(key.clone(), value.clone());
        }
        let json = Value::Object(merged).to_string();
        url::form_urlencoded::byte_serialize(json.as_bytes()).collect()
    }
}

/// Blocking HTTP transport with error normalization.
#[derive(Debug)]
pub struct Transport {
    client: Client,
}

impl Transport {
    /// Build a transport with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Network` if the TLS backend cannot be
    /// initialized.
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|source| TransportError::Network {
                url: String::new(),
                source,
            })?;
        Ok(Transport { client })
    }

    /// GET returning the parsed JSON body and the response ETag.
    pub fn get(
        &self,
        url: &str,
        context: &RequestContext,
    ) -> Result<(Value, Option<String>), TransportError> {
        let request = self.client.get(url);
        self.execute(request, url, context)
    }

    /// POST a JSON body, returning the parsed response and ETag.
    pub fn post(
        &self,
        url: &str,
        body: &Value,
        context: &RequestContext,
    ) -> Result<(Value, Option<String>), TransportError> {
        let request = self.client.post(url).json(body);
        self.execute(request, url, context)
    }

    /// PUT a JSON body, returning the parsed response and ETag.
    pub fn put(
        &self,
        url: &str,
        body: &Value,
        context: &RequestContext,
    ) -> Result<(Value, Option<String>), TransportError> {
        let request = self.client.put(url).json(body);
        self.execute(request, url, context)
    }

    /// DELETE; the catalog answers with an empty body on success.
    pub fn delete(&self, url: &str, context: &RequestContext) -> Result<(), TransportError> {
        let request = self
            .client
            .delete(url)
            .header(CONTEXT_HEADER, context.header_value());
        debug!(url, action = %context.action, "DELETE");
        let response = request.send().map_err(|source| TransportError::Network {
            url: url.to_string(),
            source,
        })?;
        Self::check_status(url, response).map(|_| ())
    }

    /// Fire all URLs concurrently and collect every outcome in input order.
    ///
    /// Used for aggregate batches: results are merged only after all
    /// requests resolve. A failed request does not cancel its siblings.
    pub fn get_many(
        &self,
        urls: &[String],
        context: &RequestContext,
    ) -> Vec<Result<Value, TransportError>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = urls
                .iter()
                .map(|url| scope.spawn(move || self.get(url, context).map(|(value, _)| value)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::InvalidResponse {
                        url: String::new(),
                        message: "request thread panicked".to_string(),
                    }),
                })
                .collect()
        })
    }

    fn execute(
        &self,
        request: RequestBuilder,
        url: &str,
        context: &RequestContext,
    ) -> Result<(Value, Option<String>), TransportError> {
        debug!(url, action = %context.action, "request");
        let response = request
            .header(CONTEXT_HEADER, context.header_value())
            .send()
            .map_err(|source| TransportError::Network {
                url: url.to_string(),
                source,
            })?;

        let response = Self::check_status(url, response)?;
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .json()
            .map_err(|source| TransportError::InvalidResponse {
                url: url.to_string(),
                message: source.to_string(),
            })?;

        Ok((body, etag))
    }

    fn check_status(url: &str, response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .unwrap_or_default()
            .trim()
            .chars()
            .take(512)
            .collect();
        Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}
