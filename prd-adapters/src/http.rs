//! HTTPS-backed object store speaking the JSON REST API of the environment.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Method, Request, Uri};
use prd_primitives::{ObjectId, ObjectKind};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::http_client::{HyperClient, build_https_client};
use crate::store::{ObjectStore, StoreError, StoreResult, object_id};

const PAGE_SIZE: u32 = 100;

/// Configuration for [`HttpObjectStore`].
#[derive(Clone)]
pub struct HttpStoreConfig {
    base_url: String,
    token: String,
    timeout: Duration,
}

impl fmt::Debug for HttpStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStoreConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpStoreConfig {
    /// Creates a configuration for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] if the URL is invalid or the token
    /// is empty.
    pub fn new(base_url: impl AsRef<str>, token: impl Into<String>) -> StoreResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(StoreError::configuration("API token must not be empty"));
        }
        Ok(Self {
            base_url: sanitize_base_url(base_url.as_ref())?,
            token,
            timeout: Duration::from_secs(60),
        })
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the sanitized base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Object store that calls the remote API over HTTP/HTTPS.
pub struct HttpObjectStore {
    client: HyperClient,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl fmt::Debug for HttpObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpObjectStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpObjectStore {
    /// Constructs a store from the supplied configuration.
    #[must_use]
    pub fn new(config: HttpStoreConfig) -> Self {
        Self {
            client: build_https_client(),
            base_url: config.base_url,
            token: config.token,
            timeout: config.timeout,
        }
    }

    fn collection_url(&self, kind: ObjectKind) -> String {
        format!("{}/{}", self.base_url, kind.collection())
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> StoreResult<Value> {
        let uri = url
            .parse::<Uri>()
            .map_err(|err| StoreError::configuration(format!("invalid request URL `{url}`: {err}")))?;

        let body = match body {
            Some(payload) => Body::from(serde_json::to_vec(payload).map_err(|err| {
                StoreError::transport(format!("failed to encode request body: {err}"))
            })?),
            None => Body::empty(),
        };

        let req = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .body(body)
            .map_err(|err| StoreError::transport(format!("failed to build request: {err}")))?;

        trace!(%method, url, "store request");
        let response = timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| StoreError::transport(format!("{method} {url} timed out")))?
            .map_err(|err| StoreError::transport(format!("{method} {url} failed: {err}")))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| StoreError::transport(format!("failed to read response: {err}")))?;

        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                reason: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::response(format!("failed to decode response: {err}")))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn create(&self, kind: ObjectKind, payload: &Value) -> StoreResult<Value> {
        let created = self
            .send(Method::POST, &self.collection_url(kind), Some(payload))
            .await?;
        debug!(%kind, id = ?created.get("id"), "object created");
        Ok(created)
    }

    async fn update(&self, kind: ObjectKind, id: ObjectId, payload: &Value) -> StoreResult<Value> {
        let url = self.object_url(kind, id);
        self.send(Method::PATCH, &url, Some(payload))
            .await
            .map_err(|err| not_found_as(kind, id, err))
    }

    async fn get(&self, kind: ObjectKind, id: ObjectId) -> StoreResult<Value> {
        let url = self.object_url(kind, id);
        self.send(Method::GET, &url, None)
            .await
            .map_err(|err| not_found_as(kind, id, err))
    }

    async fn list_all(&self, kind: ObjectKind) -> StoreResult<Vec<Value>> {
        let mut objects = Vec::new();
        let mut next = Some(format!(
            "{}?page_size={PAGE_SIZE}",
            self.collection_url(kind)
        ));

        while let Some(url) = next {
            let page: Page = serde_json::from_value(self.send(Method::GET, &url, None).await?)
                .map_err(|err| StoreError::response(format!("malformed page: {err}")))?;
            objects.extend(page.results);
            next = page.pagination.and_then(|pagination| pagination.next);
        }

        debug!(%kind, count = objects.len(), "listed objects");
        Ok(objects)
    }

    async fn create_from_template(&self, payload: &Value) -> StoreResult<Value> {
        let url = format!("{}/hooks/create", self.base_url);
        self.send(Method::POST, &url, Some(payload)).await
    }

    async fn token_owner(&self) -> StoreResult<Option<ObjectId>> {
        let url = format!("{}/auth/user", self.base_url);
        let owner = owner_from_response(self.send(Method::GET, &url, None).await)?;
        debug!(owner = ?owner, "token owner looked up");
        Ok(owner)
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<String>,
}

fn not_found_as(kind: ObjectKind, id: ObjectId, err: StoreError) -> StoreError {
    match err {
        StoreError::Status { status: 404, .. } => StoreError::NotFound { kind, id },
        other => other,
    }
}

/// The authenticated-user endpoint is optional on some deployments.
fn owner_from_response(response: StoreResult<Value>) -> StoreResult<Option<ObjectId>> {
    match response {
        Ok(user) => object_id(&user).map(Some),
        Err(StoreError::Status {
            status: 403 | 404, ..
        }) => Ok(None),
        Err(err) => Err(err),
    }
}

fn sanitize_base_url(input: &str) -> StoreResult<String> {
    let base = input.trim().trim_end_matches('/');
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(StoreError::configuration(
            "API base URL must start with http:// or https://",
        ));
    }
    base.parse::<Uri>()
        .map_err(|err| StoreError::configuration(format!("invalid API base URL: {err}")))?;
    Ok(base.to_owned())
}
