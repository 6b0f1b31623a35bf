//! The message service.
//!
//! Each client keeps one persistent connection carrying tagged JSON
//! envelopes. The connection id doubles as the run id: output frames,
//! store logs and the per-run workdir are all keyed by it.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{SinkExt, StreamExt};
use pipeline_core::{
    Envelope, EnvelopeKind, OutputSink, Pipeline, RunContext, RunOptions, SharedSink, Status,
};
use pipeline_core::output::TeeSink;
use pipeline_store::{LogKind, LogSink};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Serves the base path: a websocket upgrade opens the message
/// connection, a plain GET reports server health.
pub async fn root_handler(State(state): State<AppState>, req: Request) -> Response {
    let wants_upgrade = req
        .headers()
        .get(header::UPGRADE)
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"websocket"));

    if wants_upgrade {
        let (mut parts, _body) = req.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => upgrade.on_upgrade(move |socket| handle_socket(socket, state)),
            Err(rejection) => rejection.into_response(),
        };
    }

    Json(json!({
        "version": pipeline_core::VERSION,
        "running_at": state.started_at.to_rfc3339(),
    }))
    .into_response()
}

/// Writes output chunks to the client as stdout/stderr envelopes.
struct SocketSink {
    tx: mpsc::UnboundedSender<Envelope>,
    kind: EnvelopeKind,
}

impl OutputSink for SocketSink {
    fn append(&self, chunk: &[u8]) {
        let _ = self
            .tx
            .send(Envelope::new(self.kind, String::from_utf8_lossy(chunk)));
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn = %conn_id, "client connected");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if sender
                .send(Message::Text(envelope.encode().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let mut run_accepted = false;
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_message(&state, &conn_id, &mut run_accepted, text.as_str(), &tx);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(conn = %conn_id, error = %err, "connection error");
                break;
            }
        }
    }

    writer.abort();
    info!(conn = %conn_id, "client disconnected");
}

fn handle_message(
    state: &AppState,
    conn_id: &str,
    run_accepted: &mut bool,
    raw: &str,
    tx: &mpsc::UnboundedSender<Envelope>,
) {
    let envelope = match Envelope::decode(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            let _ = tx.send(Envelope::error(err));
            return;
        }
    };

    match envelope.kind {
        EnvelopeKind::Run => {
            if *run_accepted {
                let _ = tx.send(Envelope::error(
                    "a run was already submitted on this connection",
                ));
                return;
            }
            let pipeline = match pipeline_config::parse_pipeline(&envelope.payload) {
                Ok(pipeline) => pipeline,
                Err(err) => {
                    let _ = tx.send(Envelope::error(err));
                    return;
                }
            };
            *run_accepted = true;
            submit(state, conn_id, pipeline, envelope.payload, tx);
        }
        other => {
            let _ = tx.send(Envelope::error(format!(
                "unsupported message type: {other}"
            )));
        }
    }
}

/// Attach tee sinks (socket frames + store log) and hand the run to the
/// queue, or run it inline when no queue is configured.
fn submit(
    state: &AppState,
    conn_id: &str,
    mut pipeline: Pipeline,
    yaml: String,
    tx: &mpsc::UnboundedSender<Envelope>,
) {
    let stdout: SharedSink = Arc::new(TeeSink::new(vec![
        Arc::new(SocketSink {
            tx: tx.clone(),
            kind: EnvelopeKind::Stdout,
        }) as SharedSink,
        Arc::new(LogSink::new(
            state.store.clone(),
            conn_id,
            LogKind::Stdout,
        )) as SharedSink,
    ]));
    let stderr: SharedSink = Arc::new(TeeSink::new(vec![
        Arc::new(SocketSink {
            tx: tx.clone(),
            kind: EnvelopeKind::Stderr,
        }) as SharedSink,
        Arc::new(LogSink::new(
            state.store.clone(),
            conn_id,
            LogKind::Stderr,
        )) as SharedSink,
    ]));
    pipeline.set_stdout(stdout);
    pipeline.set_stderr(stderr);

    if let Some(queue) = &state.queue {
        let name = pipeline.name.clone();
        match queue.enqueue(conn_id, &name, pipeline, &yaml) {
            // Admission confirmed; completion is observable via the queue.
            Ok(()) => {
                let _ = tx.send(Envelope::done(""));
            }
            Err(err) => {
                let _ = tx.send(Envelope::error(err));
            }
        }
        return;
    }

    let workdir = state
        .config
        .workdir
        .join(conn_id)
        .to_string_lossy()
        .into_owned();
    let config = json!({
        "name": pipeline.name,
        "workdir": workdir,
        "timeout": pipeline.timeout,
        "image": pipeline.image,
    });
    state.store.create(conn_id, &pipeline.name, &yaml, config);
    state.store.update_status(conn_id, Status::Running, None);

    pipeline.set_workdir(workdir.as_str());
    pipeline.merge_environment(&state.config.environment);

    let store = state.store.clone();
    let executors = state.executors.clone();
    let tx = tx.clone();
    let id = conn_id.to_string();
    tokio::spawn(async move {
        let opts = RunOptions::new(executors).with_id(&id);
        match pipeline.run(&RunContext::new(), opts).await {
            Ok(()) => {
                store.update_status(&id, Status::Succeeded, None);
                let _ = tx.send(Envelope::done(""));
            }
            Err(err) => {
                let status = if err.is_cancelled() {
                    Status::Cancelled
                } else {
                    Status::Failed
                };
                store.update_status(&id, status, Some(&err.to_string()));
                let _ = tx.send(Envelope::error(format!("failed to run pipeline: {err}")));
            }
        }
    });
}
