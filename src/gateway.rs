//! Session-aware request gateway.
//!
//! Every API call goes through [`SessionGateway`]. A `401 Unauthorized`
//! response triggers a (deduplicated) session refresh and one replay of the
//! original request. If the refresh fails the caller gets
//! [`ClientError::AuthExpired`] and the re-authentication handler is told
//! where the user was, so they can come back after logging in.
//!
//! ```text
//! SENDING --2xx/other--> DONE
//!    |
//!   401
//!    v
//! REFRESHING --ok--> RETRYING --any--> DONE
//!    |
//!  failed
//!    v
//! UNAUTHENTICATED
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::ClientError;
use crate::http::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::options::{HttpTransport, SessionOptions, TransportOptions};
use crate::session::{
    HttpSessionRefresher, ReauthHandler, RefreshCoordinator, RefreshOutcome, SessionRefresher,
};
use crate::sse::{parse_sse_stream, ParseOutcome};
use crate::stream::{ChunkSink, StreamOutcome};

/// The status that signals an expired session.
pub const EXPIRY_STATUS: StatusCode = StatusCode::UNAUTHORIZED;

/// Which execution of a logical request is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Original,
    Retry,
}

/// Wraps a [`Transport`] with refresh-and-replay on session expiry.
///
/// Cheap to clone. Clones share the transport, the refresh slot, and the
/// current location.
#[derive(Clone)]
pub struct SessionGateway {
    transport: Arc<dyn Transport>,
    refresher: Arc<dyn SessionRefresher>,
    coordinator: RefreshCoordinator,
    reauth: Option<Arc<dyn ReauthHandler>>,
    options: Arc<SessionOptions>,
    location: Arc<Mutex<String>>,
}

impl SessionGateway {
    /// Gateway over `transport`, refreshing through the configured endpoint.
    pub fn new(transport: Arc<dyn Transport>, options: SessionOptions) -> Self {
        let refresher = Arc::new(HttpSessionRefresher::new(
            transport.clone(),
            options.refresh_path.clone(),
        ));
        let location = options.default_return_to.clone();

        Self {
            transport,
            refresher,
            coordinator: RefreshCoordinator::new(),
            reauth: None,
            options: Arc::new(options),
            location: Arc::new(Mutex::new(location)),
        }
    }

    /// Gateway over a `reqwest` transport built from `transport_options`.
    pub fn from_options(
        transport_options: &TransportOptions<HttpTransport>,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(transport_options)?;
        Ok(Self::new(Arc::new(transport), options))
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn SessionRefresher>) -> Self {
        self.refresher = refresher;
        self
    }

    /// Share a refresh slot with other gateways.
    pub fn with_coordinator(mut self, coordinator: RefreshCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_reauth_handler(mut self, handler: Arc<dyn ReauthHandler>) -> Self {
        self.reauth = Some(handler);
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Record where the user currently is; used as the post-login target.
    pub fn set_location(&self, location: impl Into<String>) {
        *self.location.lock() = location.into();
    }

    pub fn location(&self) -> String {
        self.location.lock().clone()
    }

    /// Send a request, returning the response only if its status is 2xx.
    ///
    /// Any other status becomes [`ClientError::Http`] carrying the body text.
    pub async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ClientError> {
        let response = self.send_with_refresh(request, cancel).await?;
        if response.status.is_success() {
            return Ok(response);
        }
        Err(http_error(response).await)
    }

    /// Send a request and decode its JSON body. `204 No Content` yields `None`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, ClientError> {
        let response = self.send(request, cancel).await?;
        if response.status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }

    /// Send a request whose response body is of no interest.
    pub async fn request_empty(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        self.send(request, cancel).await.map(drop)
    }

    /// Open a streaming response. The session policy applies to the request
    /// that opens the stream; once open, the body is the caller's.
    pub async fn open_stream(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ClientError> {
        let response = self.send(request, cancel).await?;
        if !response.has_body() {
            return Err(ClientError::StreamUnsupported);
        }
        Ok(response)
    }

    /// Open an SSE stream and feed its payloads to `sink`.
    ///
    /// Errors go to `sink.on_error`, except after `cancel` has fired or when
    /// the session is gone; the sink then hears nothing more.
    pub async fn stream_text<K>(
        &self,
        request: HttpRequest,
        sink: &mut K,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        K: ChunkSink + ?Sized,
    {
        let result = match self.open_stream(request, cancel).await {
            Ok(response) => match response.into_body() {
                Some(body) => parse_sse_stream(body, cancel, |p| sink.on_chunk(&p), || {}).await,
                None => Err(ClientError::StreamUnsupported),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(ParseOutcome::Completed) => {
                sink.on_done();
                StreamOutcome::Completed
            }
            Ok(ParseOutcome::Cancelled) => StreamOutcome::Cancelled,
            Err(e) if cancel.is_cancelled() => {
                debug!(error = %e, "suppressing error from cancelled stream");
                StreamOutcome::Cancelled
            }
            Err(ClientError::AuthExpired) => {
                debug!("stream abandoned for re-authentication");
                StreamOutcome::Unauthenticated
            }
            Err(e) => {
                warn!(error = %e, "stream failed");
                sink.on_error(e);
                StreamOutcome::Failed
            }
        }
    }

    async fn send_with_refresh(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ClientError> {
        let response = self.attempt(Attempt::Original, request.clone(), cancel).await?;
        if response.status != EXPIRY_STATUS {
            return Ok(response);
        }
        drop(response);

        debug!(path = %request.path, "session expired");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            outcome = self.coordinator.refresh(self.refresher.clone()) => outcome,
        };

        match outcome {
            RefreshOutcome::Refreshed => {
                let response = self.attempt(Attempt::Retry, request, cancel).await?;
                if response.status == EXPIRY_STATUS {
                    warn!("session still expired after refresh");
                }
                Ok(response)
            }
            RefreshOutcome::Failed if cancel.is_cancelled() => Err(ClientError::Cancelled),
            RefreshOutcome::Failed => {
                self.require_reauthentication();
                Err(ClientError::AuthExpired)
            }
        }
    }

    async fn attempt(
        &self,
        attempt: Attempt,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        debug!(?attempt, method = %request.method, path = %request.path, "sending request");
        self.transport.send(request, cancel).await
    }

    fn require_reauthentication(&self) {
        let location = self.location();
        match &self.reauth {
            Some(handler) => handler.reauthentication_required(&location),
            None => warn!(return_to = %location, "session expired and no re-authentication handler is set"),
        }
    }
}

/// Turn a failed response into [`ClientError::Http`].
async fn http_error(response: HttpResponse) -> ClientError {
    let status = response.status;
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "error body unreadable");
            status.canonical_reason().unwrap_or_default().to_string()
        }
    };
    ClientError::Http { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::ByteSource;
    use crate::stream::TextAccumulator;
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    const REFRESH: &str = "/api/v1/auth/refresh";

    enum Body {
        Chunks(Vec<&'static str>),
        Broken,
        Missing,
        /// No response until the caller's token fires.
        Hang,
    }

    struct ScriptedBody {
        chunks: VecDeque<&'static str>,
        broken: bool,
    }

    #[async_trait]
    impl ByteSource for ScriptedBody {
        async fn pull(&mut self) -> Result<Option<Bytes>, ClientError> {
            if self.broken {
                return Err(ClientError::Io("body read failed".to_string()));
            }
            Ok(self.chunks.pop_front().map(|s| Bytes::from_static(s.as_bytes())))
        }

        fn cancel(&mut self) {}

        fn release(&mut self) {}
    }

    /// Replays scripted responses per path. Refresh calls wait on `gate`.
    struct ScriptedTransport {
        script: Mutex<HashMap<&'static str, VecDeque<(u16, Body)>>>,
        sent: Mutex<Vec<String>>,
        refreshes: AtomicUsize,
        gate: Semaphore,
    }

    impl ScriptedTransport {
        fn with_permits(permits: usize) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(HashMap::new()),
                sent: Mutex::new(Vec::new()),
                refreshes: AtomicUsize::new(0),
                gate: Semaphore::new(permits),
            })
        }

        fn new() -> Arc<Self> {
            Self::with_permits(Semaphore::MAX_PERMITS)
        }

        fn gated() -> Arc<Self> {
            Self::with_permits(0)
        }

        fn respond(&self, path: &'static str, status: u16, body: Body) {
            self.script
                .lock()
                .entry(path)
                .or_default()
                .push_back((status, body));
        }

        fn sent(&self, path: &str) -> usize {
            self.sent.lock().iter().filter(|p| p.as_str() == path).count()
        }

        fn refreshes(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            request: HttpRequest,
            cancel: &CancellationToken,
        ) -> Result<HttpResponse, ClientError> {
            self.sent.lock().push(request.path.clone());
            if request.path == REFRESH {
                self.refreshes.fetch_add(1, Ordering::SeqCst);
                let _permit = self.gate.acquire().await.expect("gate open");
            }

            let next = self
                .script
                .lock()
                .get_mut(request.path.as_str())
                .and_then(|queue| queue.pop_front());
            let Some((status, body)) = next else {
                return Err(ClientError::Io(format!("connection refused: {}", request.path)));
            };

            if matches!(body, Body::Hang) {
                cancel.cancelled().await;
                return Err(ClientError::Cancelled);
            }

            let source: Option<Box<dyn ByteSource>> = match body {
                Body::Chunks(chunks) => Some(Box::new(ScriptedBody {
                    chunks: chunks.into(),
                    broken: false,
                })),
                Body::Broken => Some(Box::new(ScriptedBody {
                    chunks: VecDeque::new(),
                    broken: true,
                })),
                Body::Missing | Body::Hang => None,
            };
            Ok(HttpResponse::new(
                StatusCode::from_u16(status).expect("valid status"),
                HeaderMap::new(),
                source,
            ))
        }
    }

    #[derive(Default)]
    struct RecordingReauth {
        targets: Mutex<Vec<String>>,
    }

    impl ReauthHandler for RecordingReauth {
        fn reauthentication_required(&self, return_to: &str) {
            self.targets.lock().push(return_to.to_string());
        }
    }

    fn gateway(transport: &Arc<ScriptedTransport>) -> (SessionGateway, Arc<RecordingReauth>) {
        let reauth = Arc::new(RecordingReauth::default());
        let gateway = SessionGateway::new(transport.clone(), SessionOptions::default())
            .with_reauth_handler(reauth.clone());
        (gateway, reauth)
    }

    fn ok(body: &'static str) -> Body {
        Body::Chunks(vec![body])
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let transport = ScriptedTransport::new();
        transport.respond("/p", 200, ok(r#"{"id":"1"}"#));
        let (gateway, _) = gateway(&transport);

        let value: Option<serde_json::Value> = gateway
            .request_json(HttpRequest::get("/p"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value.unwrap()["id"], "1");
        assert_eq!(transport.refreshes(), 0);
    }

    #[tokio::test]
    async fn test_no_content_skips_body() {
        let transport = ScriptedTransport::new();
        transport.respond("/p", 204, Body::Broken);
        let (gateway, _) = gateway(&transport);

        let value: Option<serde_json::Value> = gateway
            .request_json(HttpRequest::delete("/p"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let transport = ScriptedTransport::new();
        transport.respond("/p", 404, ok("project not found"));
        let (gateway, _) = gateway(&transport);

        let err = gateway
            .request_empty(HttpRequest::get("/p"), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ClientError::Http { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "project not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.refreshes(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_error_body_falls_back_to_reason() {
        let transport = ScriptedTransport::new();
        transport.respond("/p", 502, Body::Broken);
        let (gateway, _) = gateway(&transport);

        let err = gateway
            .send(HttpRequest::get("/p"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Http { body, .. } if body == "Bad Gateway"));
    }

    #[tokio::test]
    async fn test_expiry_refreshes_and_retries_once() {
        let transport = ScriptedTransport::new();
        transport.respond("/p", 401, ok(""));
        transport.respond(REFRESH, 200, ok(""));
        transport.respond("/p", 200, ok("[]"));
        let (gateway, reauth) = gateway(&transport);

        let value: Option<Vec<String>> = gateway
            .request_json(HttpRequest::get("/p"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, Some(vec![]));
        assert_eq!(transport.sent("/p"), 2);
        assert_eq!(transport.refreshes(), 1);
        assert!(reauth.targets.lock().is_empty());
    }

    #[tokio::test]
    async fn test_retry_result_is_final_even_if_expired() {
        let transport = ScriptedTransport::new();
        transport.respond("/p", 401, ok(""));
        transport.respond(REFRESH, 200, ok(""));
        transport.respond("/p", 401, ok("still expired"));
        let (gateway, reauth) = gateway(&transport);

        let err = gateway
            .send(HttpRequest::get("/p"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(transport.sent("/p"), 2);
        assert_eq!(transport.refreshes(), 1);
        assert!(reauth.targets.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_redirects_without_retry() {
        let transport = ScriptedTransport::new();
        transport.respond("/p", 401, ok(""));
        transport.respond(REFRESH, 401, ok(""));
        let (gateway, reauth) = gateway(&transport);
        gateway.set_location("/projects/7");

        let err = gateway
            .send(HttpRequest::get("/p"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_auth_expired());
        assert_eq!(transport.sent("/p"), 1);
        assert_eq!(reauth.targets.lock().as_slice(), ["/projects/7"]);
    }

    #[tokio::test]
    async fn test_refresh_transport_error_counts_as_failure() {
        let transport = ScriptedTransport::new();
        transport.respond("/p", 401, ok(""));
        // No scripted refresh response: the transport reports a network error.
        let (gateway, reauth) = gateway(&transport);

        let err = gateway
            .send(HttpRequest::get("/p"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_auth_expired());
        assert_eq!(transport.refreshes(), 1);
        assert_eq!(reauth.targets.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_expiry_shares_one_refresh() {
        let transport = ScriptedTransport::gated();
        transport.respond("/a", 401, ok(""));
        transport.respond("/b", 401, ok(""));
        transport.respond(REFRESH, 200, ok(""));
        transport.respond("/a", 200, ok(r#""a""#));
        transport.respond("/b", 200, ok(r#""b""#));
        let (gateway, _) = gateway(&transport);
        let cancel = CancellationToken::new();

        let (a, b, ()) = tokio::join!(
            gateway.request_json::<String>(HttpRequest::get("/a"), &cancel),
            gateway.request_json::<String>(HttpRequest::get("/b"), &cancel),
            async {
                while transport.refreshes() == 0 {
                    tokio::task::yield_now().await;
                }
                transport.gate.add_permits(1);
            }
        );

        assert_eq!(a.unwrap().as_deref(), Some("a"));
        assert_eq!(b.unwrap().as_deref(), Some("b"));
        assert_eq!(transport.refreshes(), 1);
        assert_eq!(transport.sent("/a"), 2);
        assert_eq!(transport.sent("/b"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_expiry_with_failed_refresh() {
        let transport = ScriptedTransport::gated();
        transport.respond("/a", 401, ok(""));
        transport.respond("/b", 401, ok(""));
        transport.respond(REFRESH, 500, ok(""));
        let (gateway, reauth) = gateway(&transport);
        let cancel = CancellationToken::new();

        let (a, b, ()) = tokio::join!(
            gateway.send(HttpRequest::get("/a"), &cancel),
            gateway.send(HttpRequest::get("/b"), &cancel),
            async {
                while transport.refreshes() == 0 {
                    tokio::task::yield_now().await;
                }
                transport.gate.add_permits(1);
            }
        );

        assert!(a.unwrap_err().is_auth_expired());
        assert!(b.unwrap_err().is_auth_expired());
        assert_eq!(transport.refreshes(), 1);
        assert_eq!(transport.sent("/a"), 1);
        assert_eq!(transport.sent("/b"), 1);
        assert_eq!(reauth.targets.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_before_send() {
        let transport = ScriptedTransport::new();
        let (gateway, _) = gateway(&transport);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = gateway.send(HttpRequest::get("/p"), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.sent("/p"), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_refresh_skips_retry_and_redirect() {
        let transport = ScriptedTransport::gated();
        transport.respond("/p", 401, ok(""));
        transport.respond(REFRESH, 500, ok(""));
        let (gateway, reauth) = gateway(&transport);
        let cancel = CancellationToken::new();

        let (result, ()) = tokio::join!(gateway.send(HttpRequest::get("/p"), &cancel), async {
            while transport.refreshes() == 0 {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
            transport.gate.add_permits(1);
        });

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(transport.sent("/p"), 1);
        assert!(reauth.targets.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stream_text_delivers_payloads_then_done() {
        let transport = ScriptedTransport::new();
        transport.respond(
            "/gen",
            200,
            Body::Chunks(vec!["data: Hel", "lo\n\ndata: , world\n", "data: [DONE]\n\n"]),
        );
        let (gateway, _) = gateway(&transport);
        let mut sink = TextAccumulator::new();

        let outcome = gateway
            .stream_text(HttpRequest::post("/gen"), &mut sink, &CancellationToken::new())
            .await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(sink.text(), "Hello, world");
        assert!(sink.is_done());
    }

    #[tokio::test]
    async fn test_stream_text_refreshes_before_opening() {
        let transport = ScriptedTransport::new();
        transport.respond("/gen", 401, ok(""));
        transport.respond(REFRESH, 200, ok(""));
        transport.respond("/gen", 200, ok("data: token\n"));
        let (gateway, _) = gateway(&transport);
        let mut sink = TextAccumulator::new();

        let outcome = gateway
            .stream_text(HttpRequest::post("/gen"), &mut sink, &CancellationToken::new())
            .await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(sink.text(), "token");
    }

    #[tokio::test]
    async fn test_stream_without_body_is_unsupported() {
        let transport = ScriptedTransport::new();
        transport.respond("/gen", 200, Body::Missing);
        let (gateway, _) = gateway(&transport);
        let mut sink = TextAccumulator::new();

        let outcome = gateway
            .stream_text(HttpRequest::post("/gen"), &mut sink, &CancellationToken::new())
            .await;
        assert_eq!(outcome, StreamOutcome::Failed);
        assert!(matches!(sink.error(), Some(ClientError::StreamUnsupported)));
        assert!(!sink.is_done());
    }

    #[tokio::test]
    async fn test_stream_error_reported_to_sink() {
        let transport = ScriptedTransport::new();
        transport.respond("/gen", 200, Body::Broken);
        let (gateway, _) = gateway(&transport);
        let mut sink = TextAccumulator::new();

        let outcome = gateway
            .stream_text(HttpRequest::post("/gen"), &mut sink, &CancellationToken::new())
            .await;
        assert_eq!(outcome, StreamOutcome::Failed);
        assert!(matches!(sink.error(), Some(ClientError::Io(_))));
    }

    #[tokio::test]
    async fn test_cancel_during_retry_is_silent() {
        let transport = ScriptedTransport::new();
        transport.respond("/gen", 401, ok(""));
        transport.respond(REFRESH, 200, ok(""));
        transport.respond("/gen", 200, Body::Hang);
        let (gateway, reauth) = gateway(&transport);
        let mut sink = TextAccumulator::new();
        let cancel = CancellationToken::new();

        let (outcome, ()) = tokio::join!(
            gateway.stream_text(HttpRequest::post("/gen"), &mut sink, &cancel),
            async {
                while transport.sent("/gen") < 2 {
                    tokio::task::yield_now().await;
                }
                cancel.cancel();
            }
        );

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert_eq!(transport.refreshes(), 1);
        assert_eq!(transport.sent("/gen"), 2);
        assert_eq!(sink.chunks(), 0);
        assert!(!sink.is_done());
        assert!(sink.error().is_none());
        assert!(reauth.targets.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_refresh_skips_retry() {
        let transport = ScriptedTransport::gated();
        transport.respond("/p", 401, ok(""));
        transport.respond(REFRESH, 200, ok(""));
        transport.respond("/p", 200, ok("[]"));
        let (gateway, _) = gateway(&transport);
        let cancel = CancellationToken::new();

        // The token fires while the refresh is still in flight; the refresh
        // itself succeeds, but the retry must not be sent.
        let (result, ()) = tokio::join!(gateway.send(HttpRequest::get("/p"), &cancel), async {
            while transport.refreshes() == 0 {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
            transport.gate.add_permits(1);
        });

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(transport.sent("/p"), 1);
    }

    #[tokio::test]
    async fn test_stream_with_dead_session_only_redirects() {
        let transport = ScriptedTransport::new();
        transport.respond("/gen", 401, ok(""));
        transport.respond(REFRESH, 401, ok(""));
        let (gateway, reauth) = gateway(&transport);
        let mut sink = TextAccumulator::new();

        let outcome = gateway
            .stream_text(HttpRequest::post("/gen"), &mut sink, &CancellationToken::new())
            .await;
        assert_eq!(outcome, StreamOutcome::Unauthenticated);
        assert!(sink.error().is_none());
        assert!(!sink.is_done());
        assert_eq!(reauth.targets.lock().as_slice(), ["/dashboard"]);
    }

    #[tokio::test]
    async fn test_cancelled_stream_is_silent() {
        let transport = ScriptedTransport::new();
        let (gateway, _) = gateway(&transport);
        let mut sink = TextAccumulator::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = gateway
            .stream_text(HttpRequest::post("/gen"), &mut sink, &cancel)
            .await;
        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert!(sink.error().is_none());
        assert!(!sink.is_done());
        assert_eq!(sink.chunks(), 0);
    }
}
