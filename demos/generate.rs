//! Streams one AI generation to stdout.
//!
//! Run with:
//! ```bash
//! export CFFORGE_BASE_URL="https://forge.example.com"
//! cargo run --example generate -- "Add a health endpoint"
//! ```
//!
//! Ctrl-C cancels the stream.

use std::io::Write;
use std::sync::Arc;

use cfforge_client::api::ForgeApi;
use cfforge_client::model::GenerateRequest;
use cfforge_client::options::{HttpTransport, SessionOptions, TransportOptions};
use cfforge_client::session::LoginRedirect;
use cfforge_client::stream::{StreamEvent, StreamOutcome};
use cfforge_client::{logging, SessionGateway};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Write a hello world Spring Boot controller.".to_string());

    let transport_options = TransportOptions::new(HttpTransport::from_env());
    let base_url = transport_options.provider.base_url_or_default().to_string();
    let session_options = SessionOptions::default();

    // Outside a browser, "navigating" to the login page means telling the user.
    let redirect = LoginRedirect::new(&session_options, move |url: &str| {
        eprintln!("\nSession expired. Log in at {base_url}{url} and run again.");
    });
    let gateway = SessionGateway::from_options(&transport_options, session_options)?
        .with_reauth_handler(Arc::new(redirect));
    gateway.set_location("/builder");
    let api = ForgeApi::new(gateway);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let (mut tx, mut rx) = mpsc::unbounded_channel();
    let request = GenerateRequest::new("demo-conversation", prompt);
    let stream_cancel = cancel.clone();
    let task =
        tokio::spawn(async move { api.generate(&request, &mut tx, &stream_cancel).await });

    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Chunk(text) => {
                print!("{text}");
                stdout.flush()?;
            }
            StreamEvent::Done => println!(),
            StreamEvent::Error(e) => eprintln!("\nGeneration failed: {e}"),
        }
    }

    if task.await? == StreamOutcome::Cancelled {
        eprintln!("\nCancelled.");
    }
    Ok(())
}
