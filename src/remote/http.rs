//! REST implementation of [`RemoteService`].
//!
//! Collections map to URL paths under the configured base:
//! - create: `POST {base}/{entity}`
//! - update: `PATCH {base}/{entity}/{id}`
//! - delete: `DELETE {base}/{entity}/{id}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde_json::Value;

use super::{RemoteError, RemoteService};
use crate::config::RemoteConfig;
use crate::error::OutboundError;
use crate::queue::{EntityKind, Payload};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Map a non-success HTTP status to a remote error.
///
/// Auth failures count as server-side trouble: a refreshed token makes the
/// same request succeed.
#[must_use]
pub fn classify_status(status: u16, message: String) -> RemoteError {
    match status {
        401 | 403 | 408 | 425 | 429 | 500..=599 => RemoteError::Server { status, message },
        404 | 410 => RemoteError::NotFound(message),
        409 | 412 => RemoteError::Conflict(message),
        _ => RemoteError::Validation(format!("{status}: {message}")),
    }
}

fn transport_error(err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(err.to_string())
    }
}

/// Pull the server-assigned id out of a create response.
///
/// Accepts a single object or an array holding one (as returned by
/// `PostgREST`-style endpoints), with a string or numeric id.
///
/// # Errors
///
/// Returns a validation error if the response carries no usable id.
pub fn extract_id(body: &Value, field: &str) -> Result<String, RemoteError> {
    let record = match body {
        Value::Array(rows) => rows.first(),
        other => Some(other),
    };

    match record.and_then(|r| r.get(field)) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(RemoteError::Validation(format!(
            "create response has no '{field}'"
        ))),
    }
}

/// HTTP client for the remote persistence service.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
    id_field: String,
    health_path: String,
}

impl HttpRemote {
    /// Build a client from the remote settings.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL is configured, it does not parse, or
    /// the HTTP client cannot be built.
    pub fn new(config: &RemoteConfig) -> Result<Self, OutboundError> {
        let raw = config.require_base_url()?;

        let base = Url::parse(raw)
            .map_err(|e| OutboundError::Config(format!("Invalid remote.base_url '{raw}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(OutboundError::Config(format!(
                "Invalid remote.base_url '{raw}': not a base URL"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| OutboundError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            token: config.token.clone().filter(|t| !t.is_empty()),
            id_field: config.id_field.clone(),
            health_path: config.health_path.clone(),
        })
    }

    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Whether the remote answers at all. Any HTTP response counts.
    pub async fn probe(&self) -> bool {
        let url = self.url_with(self.health_path.split('/'));
        match self.client.get(url).send().await {
            Ok(response) => {
                tracing::trace!(status = %response.status(), "probe answered");
                true
            }
            Err(e) => {
                tracing::trace!(error = %e, "probe failed");
                false
            }
        }
    }

    fn collection_url(&self, entity: &EntityKind) -> Url {
        self.url_with([entity.as_str()])
    }

    fn record_url(&self, entity: &EntityKind, id: &str) -> Url {
        self.url_with([entity.as_str(), id])
    }

    fn url_with<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        // `new` rejected cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments.into_iter().filter(|s| !s.is_empty()));
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let mut message: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        if message.is_empty() {
            message = status.canonical_reason().unwrap_or("request failed").to_string();
        }
        tracing::debug!(status = status.as_u16(), %message, "remote rejected request");

        Err(classify_status(status.as_u16(), message))
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn create(&self, entity: &EntityKind, payload: &Payload) -> Result<String, RemoteError> {
        let builder = self
            .request(Method::POST, self.collection_url(entity))
            .header("Prefer", HeaderValue::from_static("return=representation"))
            .json(payload);

        let response = self.send(builder).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Validation(format!("unreadable create response: {e}")))?;

        extract_id(&body, &self.id_field)
    }

    async fn update(
        &self,
        entity: &EntityKind,
        id: &str,
        payload: &Payload,
    ) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::PATCH, self.record_url(entity, id))
            .json(payload);
        self.send(builder).await.map(|_| ())
    }

    async fn delete(&self, entity: &EntityKind, id: &str) -> Result<(), RemoteError> {
        let builder = self.request(Method::DELETE, self.record_url(entity, id));
        match self.send(builder).await {
            Ok(_) => Ok(()),
            // Already gone: the delete was applied by an earlier attempt.
            Err(RemoteError::NotFound(_)) => {
                tracing::debug!(%entity, id, "delete target already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
