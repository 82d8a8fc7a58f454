//! Session refresh coordination and re-authentication hand-off.
//!
//! When many requests see an expired session at once, exactly one refresh
//! exchange runs; every caller that observes the expiry while it is in
//! flight awaits that same outcome.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientError;
use crate::http::{HttpRequest, Transport};
use crate::options::SessionOptions;

/// Result of a refresh exchange, shared by every caller that awaited it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Failed,
}

/// Exchanges an expired session credential for a fresh one.
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn refresh(&self) -> Result<(), ClientError>;
}

/// Refreshes the session by POSTing to the refresh endpoint with the
/// session cookies attached. Any non-2xx status is a failure.
pub struct HttpSessionRefresher {
    transport: Arc<dyn Transport>,
    path: String,
}

impl HttpSessionRefresher {
    pub fn new(transport: Arc<dyn Transport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }
}

#[async_trait]
impl SessionRefresher for HttpSessionRefresher {
    async fn refresh(&self) -> Result<(), ClientError> {
        // The exchange is shared, so no single caller's token may abort it.
        let response = self
            .transport
            .send(HttpRequest::post(self.path.as_str()), &CancellationToken::new())
            .await?;

        if response.status.is_success() {
            Ok(())
        } else {
            Err(ClientError::Http {
                status: response.status,
                body: response.status.canonical_reason().unwrap_or_default().to_string(),
            })
        }
    }
}

struct InFlight {
    id: u64,
    outcome: Shared<BoxFuture<'static, RefreshOutcome>>,
}

#[derive(Default)]
struct Slot {
    next_id: u64,
    in_flight: Option<InFlight>,
}

/// Clears the slot when the refresh task ends, even if the refresher panics.
struct ClearSlot {
    id: u64,
    slot: Arc<Mutex<Slot>>,
}

impl Drop for ClearSlot {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.in_flight.as_ref().is_some_and(|f| f.id == self.id) {
            slot.in_flight = None;
        }
    }
}

/// Single-slot deduplication of refresh exchanges.
///
/// The first caller to find the slot empty spawns the refresh and installs a
/// shared handle to its outcome; later callers clone that handle. The
/// spawned task clears the slot itself on settlement, so callers that give up
/// waiting can never leave it permanently busy.
///
/// Clones share the same slot.
#[derive(Clone, Default)]
pub struct RefreshCoordinator {
    slot: Arc<Mutex<Slot>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.slot.lock().in_flight.is_some()
    }

    /// Start a refresh, or join the one already in flight.
    pub async fn refresh(&self, refresher: Arc<dyn SessionRefresher>) -> RefreshOutcome {
        let outcome = {
            let mut guard = self.slot.lock();
            let slot = &mut *guard;
            match &slot.in_flight {
                Some(in_flight) => {
                    debug!(refresh_id = in_flight.id, "joining in-flight session refresh");
                    in_flight.outcome.clone()
                }
                None => {
                    slot.next_id += 1;
                    let id = slot.next_id;
                    info!(refresh_id = id, "starting session refresh");

                    let clear = ClearSlot {
                        id,
                        slot: self.slot.clone(),
                    };
                    let handle = tokio::spawn(run_refresh(refresher, clear));
                    let outcome = async move {
                        handle.await.unwrap_or_else(|e| {
                            warn!(refresh_id = id, error = %e, "session refresh task aborted");
                            RefreshOutcome::Failed
                        })
                    }
                    .boxed()
                    .shared();

                    slot.in_flight = Some(InFlight {
                        id,
                        outcome: outcome.clone(),
                    });
                    outcome
                }
            }
        };

        outcome.await
    }
}

async fn run_refresh(refresher: Arc<dyn SessionRefresher>, clear: ClearSlot) -> RefreshOutcome {
    let outcome = match refresher.refresh().await {
        Ok(()) => {
            info!(refresh_id = clear.id, "session refreshed");
            RefreshOutcome::Refreshed
        }
        Err(e) => {
            warn!(refresh_id = clear.id, error = %e, "session refresh failed");
            RefreshOutcome::Failed
        }
    };
    drop(clear);
    outcome
}

/// Told when the session is gone and the user has to log in again.
pub trait ReauthHandler: Send + Sync {
    /// `return_to` is the location the user should come back to.
    fn reauthentication_required(&self, return_to: &str);
}

/// Sends the user to the login entry point with a `redirect` parameter.
///
/// `navigate` performs the actual navigation; in a browser host that is a
/// full-page load, elsewhere it may open a URL or notify a UI.
pub struct LoginRedirect<F> {
    login_path: String,
    default_return_to: String,
    navigate: F,
}

impl<F> LoginRedirect<F>
where
    F: Fn(&str) + Send + Sync,
{
    pub fn new(options: &SessionOptions, navigate: F) -> Self {
        Self {
            login_path: options.login_path.clone(),
            default_return_to: options.default_return_to.clone(),
            navigate,
        }
    }

    /// Login URL carrying `return_to` for the post-login redirect.
    pub fn login_url(&self, return_to: &str) -> String {
        let target = sanitize_return_to(return_to, &self.default_return_to);
        format!("{}?redirect={}", self.login_path, urlencoding::encode(target))
    }
}

impl<F> ReauthHandler for LoginRedirect<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn reauthentication_required(&self, return_to: &str) {
        let url = self.login_url(return_to);
        info!(login_url = %url, "session expired, redirecting to login");
        (self.navigate)(&url);
    }
}

/// Only same-origin absolute paths are allowed as return targets.
pub fn sanitize_return_to<'a>(return_to: &'a str, fallback: &'a str) -> &'a str {
    if return_to.starts_with('/') && !return_to.starts_with("//") && !return_to.contains("://") {
        return_to
    } else {
        fallback
    }
}
