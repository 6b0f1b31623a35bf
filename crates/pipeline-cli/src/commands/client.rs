//! Remote submission over the message connection.

use std::io::Write;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use pipeline_core::{Envelope, EnvelopeKind};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;
use url::Url;

use super::{load_config, resolve_config};

/// Submit a pipeline to a server and stream stdout/stderr frames to the
/// terminal until the server reports done or error.
pub async fn client(server: &str, config: Option<String>) -> Result<()> {
    let config = resolve_config(config)?;
    let yaml = load_config(&config).await?;
    // Fail on syntax locally before bothering the server.
    pipeline_config::parse_pipeline(&yaml)
        .with_context(|| format!("failed to parse config {config}"))?;

    let mut url = Url::parse(server).with_context(|| format!("invalid server address {server}"))?;
    let username = url.username().to_string();
    let password = url.password().unwrap_or_default().to_string();
    if !username.is_empty() || !password.is_empty() {
        let _ = url.set_username("");
        let _ = url.set_password(None);
    }

    debug!(server = %url, "connecting");
    let mut request = url
        .as_str()
        .into_client_request()
        .context("invalid server address")?;
    if !username.is_empty() || !password.is_empty() {
        let credentials = BASE64.encode(format!("{username}:{password}"));
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {credentials}"))?,
        );
    }

    let (stream, _) = connect_async(request)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let (mut sink, mut source) = stream.split();

    sink.send(Message::Text(Envelope::run(yaml).encode()))
        .await
        .context("failed to submit pipeline")?;

    while let Some(message) = source.next().await {
        let message = message.context("connection error")?;
        match message {
            Message::Text(text) => {
                let envelope = Envelope::decode(&text)?;
                match envelope.kind {
                    EnvelopeKind::Stdout | EnvelopeKind::Log => {
                        print!("{}", envelope.payload);
                        let _ = std::io::stdout().flush();
                    }
                    EnvelopeKind::Stderr => {
                        eprint!("{}", envelope.payload);
                        let _ = std::io::stderr().flush();
                    }
                    EnvelopeKind::Done => {
                        if envelope.payload.is_empty() {
                            return Ok(());
                        }
                        bail!("pipeline failed: {}", envelope.payload);
                    }
                    EnvelopeKind::Error => {
                        bail!("server error: {}", envelope.payload);
                    }
                    EnvelopeKind::Run => {
                        debug!("ignoring unexpected run frame from server");
                    }
                }
            }
            Message::Close(frame) => {
                bail!("connection closed by server: {frame:?}");
            }
            _ => {}
        }
    }

    bail!("connection closed before the run finished")
}
