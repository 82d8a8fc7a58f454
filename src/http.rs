//! HTTP transport for the Forge API.
//!
//! Requests and responses are transport-neutral values so the session gateway
//! can be driven by any [`Transport`]. [`ReqwestTransport`] is the production
//! implementation; response bodies are exposed as pull-based [`ByteSource`]s.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::client::ClientError;
use crate::options::{CredentialsMode, HttpTransport, TransportOptions};
use crate::sse::{ByteSource, SourceGuard};

/// An outbound request, relative to the transport's base URL.
///
/// Cheap to clone: the body is reference counted, so the gateway can replay it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub credentials: CredentialsMode,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            credentials: CredentialsMode::Include,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Serialize `body` as the JSON request body.
    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ClientError> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Ask for a `text/event-stream` response.
    pub fn accept_event_stream(self) -> Self {
        self.with_header(ACCEPT, HeaderValue::from_static("text/event-stream"))
    }

    pub fn with_credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = credentials;
        self
    }
}

/// A response whose body has not been read yet.
///
/// The body source is released when it is read to the end, handed off with
/// [`HttpResponse::into_body`], or when the response is dropped.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: Option<Box<dyn ByteSource>>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Option<Box<dyn ByteSource>>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body: Option<Box<dyn ByteSource>> = if status_allows_body(status) {
            Some(Box::new(ResponseBytes::new(response)))
        } else {
            None
        };
        Self::new(status, headers, body)
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Take ownership of the body source. The caller becomes responsible
    /// for releasing it.
    pub fn into_body(mut self) -> Option<Box<dyn ByteSource>> {
        self.body.take()
    }

    /// Read the whole body.
    pub async fn bytes(mut self) -> Result<Bytes, ClientError> {
        match self.body.take() {
            Some(body) => read_to_end(body).await,
            None => Ok(Bytes::new()),
        }
    }

    /// Read the whole body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String, ClientError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read the whole body and deserialize it as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl Drop for HttpResponse {
    fn drop(&mut self) {
        if let Some(mut body) = self.body.take() {
            body.release();
        }
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Whether a response with `status` may carry a body at all.
pub fn status_allows_body(status: StatusCode) -> bool {
    !matches!(
        status,
        StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT | StatusCode::NOT_MODIFIED
    ) && !status.is_informational()
}

/// Drain a source into one buffer, releasing it afterwards.
pub async fn read_to_end<S: ByteSource>(source: S) -> Result<Bytes, ClientError> {
    let mut source = SourceGuard::new(source);
    let mut buf = BytesMut::new();
    while let Some(chunk) = source.pull().await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// [`ByteSource`] over a `reqwest::Response` body.
pub struct ResponseBytes {
    inner: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
}

impl ResponseBytes {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            inner: Some(response.bytes_stream().boxed()),
        }
    }
}

#[async_trait]
impl ByteSource for ResponseBytes {
    async fn pull(&mut self) -> Result<Option<Bytes>, ClientError> {
        let Some(stream) = self.inner.as_mut() else {
            return Ok(None);
        };
        match stream.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(ClientError::Transport(e)),
            None => Ok(None),
        }
    }

    fn cancel(&mut self) {
        // Dropping the body aborts the transfer.
        if self.inner.take().is_some() {
            debug!("response body cancelled");
        }
    }

    fn release(&mut self) {
        self.inner = None;
    }
}

/// Sends [`HttpRequest`]s and returns responses with unread bodies.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request. Firing `cancel` before the response head arrives
    /// aborts the call with [`ClientError::Cancelled`].
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ClientError>;
}

/// Production transport backed by `reqwest`.
///
/// Holds two clients: one with a cookie store for credentialed requests and
/// one without for anonymous ones.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    base_url: String,
    client: Client,
    anonymous: Client,
    extra_headers: Option<HashMap<String, String>>,
}

impl ReqwestTransport {
    pub fn new(transport_options: &TransportOptions<HttpTransport>) -> Result<Self, ClientError> {
        let base_url = transport_options.provider.base_url_or_default().to_string();
        Url::parse(&base_url)
            .map_err(|e| ClientError::Config(format!("invalid base URL {base_url}: {e}")))?;

        Ok(Self {
            base_url,
            client: build_http_client(transport_options, true)?,
            anonymous: build_http_client(transport_options, false)?,
            extra_headers: transport_options.provider.extra_headers.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| ClientError::Config(format!("invalid request URL {raw}: {e}")))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ClientError> {
        let url = self.url(&request.path)?;
        let client = match request.credentials {
            CredentialsMode::Include => &self.client,
            CredentialsMode::Omit => &self.anonymous,
        };

        let mut req = client.request(request.method, url).headers(request.headers);
        req = add_extra_headers(req, &self.extra_headers);
        if let Some(body) = request.body {
            req = req.body(body);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            response = req.send() => response?,
        };

        Ok(HttpResponse::from_reqwest(response))
    }
}

/// Build a configured HTTP client from transport options.
///
/// This applies timeout, proxy, and (when `cookies` is set) a session cookie
/// store. An unparseable proxy URL is logged and skipped.
pub fn build_http_client(
    transport_options: &TransportOptions<HttpTransport>,
    cookies: bool,
) -> Result<Client, ClientError> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport_options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &transport_options.provider.proxy {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => warn!(proxy = %proxy_url, error = %e, "ignoring invalid proxy URL"),
        }
    }

    if cookies {
        builder = builder.cookie_store(true);
    }

    Ok(builder.build()?)
}

/// Add extra headers to a request if specified in transport options.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}
