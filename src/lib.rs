//! # cfforge-client - Forge IDE console client
//!
//! Async client for the Forge API with two load-bearing pieces:
//!
//! - **Streaming ingestion**: Server-Sent Event bodies are decoded
//!   incrementally, so multi-byte characters and lines split across network
//!   chunks come out whole.
//! - **Session gateway**: a `401` triggers one shared session refresh and a
//!   single replay of the request; a failed refresh hands the user to the
//!   login flow.
//!
//! ## Architecture
//!
//! - **`Transport`**: sends one request; `ReqwestTransport` keeps the session
//!   cookie jar.
//! - **`SessionGateway`**: wraps a transport with refresh-and-replay.
//! - **`ForgeApi`**: typed REST calls on top of the gateway.
//! - **`ChunkSink`**: receives streamed payloads.
//!
//! ## Example
//! ```no_run
//! use cfforge_client::api::ForgeApi;
//! use cfforge_client::model::GenerateRequest;
//! use cfforge_client::stream::TextAccumulator;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = ForgeApi::from_env()?;
//!
//!     for project in api.projects().list().await? {
//!         println!("{} ({})", project.name, project.status);
//!     }
//!
//!     let mut sink = TextAccumulator::new();
//!     let request = GenerateRequest::new("conv-1", "Add a health endpoint");
//!     api.generate(&request, &mut sink, &CancellationToken::new()).await;
//!     println!("{}", sink.text());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod gateway;
pub mod http;
pub mod logging;
pub mod model;
pub mod options;
pub mod session;
pub mod sse;
pub mod stream;

// Re-exports for convenience
pub use api::ForgeApi;
pub use client::ClientError;
pub use gateway::SessionGateway;
pub use http::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use session::{LoginRedirect, ReauthHandler, RefreshCoordinator};
pub use sse::{parse_sse_stream, ByteSource, SseResponseExt};
pub use stream::{ChunkSink, StreamOutcome, TextAccumulator};
