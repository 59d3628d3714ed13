//! Mock orchestrator server.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swarmforge_core::codec::{self, EnvelopeHeader};
use swarmforge_core::{
    CancelTask, CustomModeInfo, CustomModes, Envelope, ErrorData, GenerateAsset, GetCustomModes,
    Payload, Plan, RunCustomMode, SCRIPT_ASSET_TYPE, TaskItem, TaskList, TaskUpdate,
    ValidateScript, now_timestamp,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;

/// Pause between simulated task steps.
const STEP: Duration = Duration::from_millis(300);

/// Request ids cancelled by any client.
type Cancelled = Arc<Mutex<HashSet<String>>>;

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let cancelled: Cancelled = Arc::default();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}", addr);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let cancelled = cancelled.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, cancelled).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    cancelled: Cancelled,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();
    tracing::info!("Client connected: {}", addr);

    // Replies come from spawned task simulations as well as the read loop.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("WebSocket error: {}", e);
                break;
            }
        };
        let Message::Text(text) = msg else {
            continue;
        };
        let header = match codec::decode_header(text.as_str()) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Invalid message: {}", e);
                send(
                    &out_tx,
                    ErrorData {
                        message: format!("invalid message: {e}"),
                        code: Some("malformed".to_string()),
                    },
                    None,
                );
                continue;
            }
        };
        if let Err(e) = handle_message(&header, text.as_str(), &out_tx, &cancelled).await {
            tracing::warn!("Bad `{}` payload: {}", header.kind, e);
            send(
                &out_tx,
                ErrorData {
                    message: format!("bad `{}` payload: {e}", header.kind),
                    code: Some("malformed".to_string()),
                },
                header.request_id.as_deref(),
            );
        }
    }

    writer.abort();
    tracing::info!("Client disconnected: {}", addr);
    Ok(())
}

fn send<T: Payload>(out: &mpsc::UnboundedSender<String>, data: T, request_id: Option<&str>) {
    let envelope = match request_id {
        Some(id) => Envelope::correlated(data, id),
        None => Envelope::new(data),
    };
    match codec::encode(&envelope) {
        Ok(text) => {
            let _ = out.send(text);
        }
        Err(e) => tracing::error!("Failed to encode reply: {}", e),
    }
}

fn update(task_id: &str, status: &str, description: &str, details: Option<String>) -> TaskUpdate {
    TaskUpdate {
        task_id: task_id.to_string(),
        status: status.to_string(),
        description: Some(description.to_string()),
        agent: Some("mock".to_string()),
        timestamp: Some(now_timestamp()),
        details,
    }
}

async fn handle_message(
    header: &EnvelopeHeader,
    text: &str,
    out: &mpsc::UnboundedSender<String>,
    cancelled: &Cancelled,
) -> anyhow::Result<()> {
    let request_id = header.request_id.clone();
    match header.kind.as_str() {
        GetCustomModes::TYPE => {
            let modes = ["architect", "coder", "asset-artist"]
                .into_iter()
                .map(|name| CustomModeInfo {
                    name: name.to_string(),
                    description: Some(format!("Mock {name} mode")),
                    system_prompt: None,
                })
                .collect();
            send(out, CustomModes { modes }, request_id.as_deref());
        }
        RunCustomMode::TYPE => {
            let run = codec::decode::<RunCustomMode>(text)?.into_data();
            tracing::info!("Running mode {}", run.mode);
            let steps = vec![
                ("running", format!("mode {} started", run.mode), None),
                ("completed", format!("mode {} finished", run.mode), None),
            ];
            simulate(out.clone(), cancelled.clone(), request_id, steps);
        }
        Plan::TYPE => {
            let plan = codec::decode::<Plan>(text)?.into_data();
            tracing::info!("Planning: {}", plan.prompt);
            let tasks = vec![
                TaskItem {
                    id: 1,
                    kind: "design".to_string(),
                    description: Some(format!("Outline: {}", plan.prompt)),
                    agent: Some("architect".to_string()),
                },
                TaskItem {
                    id: 2,
                    kind: "asset".to_string(),
                    description: Some("Block out geometry".to_string()),
                    agent: Some("asset-artist".to_string()),
                },
            ];
            send(out, TaskList { tasks }, request_id.as_deref());
            let steps = vec![
                ("running", "planning".to_string(), None),
                ("completed", "plan ready".to_string(), None),
            ];
            simulate(out.clone(), cancelled.clone(), request_id, steps);
        }
        GenerateAsset::TYPE => {
            let generate = codec::decode::<GenerateAsset>(text)?.into_data();
            if generate.asset_type == SCRIPT_ASSET_TYPE {
                let name = generate
                    .parameters
                    .get("name")
                    .and_then(|name| name.as_str())
                    .unwrap_or("GeneratedScript")
                    .to_string();
                tracing::info!("Writing script {}", name);
                let steps = vec![
                    ("running", "writing script".to_string(), None),
                    (
                        "completed",
                        "script ready".to_string(),
                        Some(format!("Assets/Scripts/{name}.cs")),
                    ),
                ];
                simulate(out.clone(), cancelled.clone(), request_id, steps);
                return Ok(());
            }
            let name = generate
                .parameters
                .get("script_path")
                .and_then(|path| path.as_str())
                .and_then(|path| std::path::Path::new(path).file_stem())
                .and_then(|stem| stem.to_str())
                .unwrap_or("GeneratedAsset")
                .to_string();
            tracing::info!("Generating {} asset {}", generate.asset_type, name);
            let steps = vec![
                ("queued", "waiting for a worker".to_string(), None),
                ("running", "executing script".to_string(), None),
                ("running", "exporting".to_string(), None),
                (
                    "CompletedSuccessfully",
                    "asset ready".to_string(),
                    Some(format!("Assets/Generated/{name}.fbx")),
                ),
            ];
            simulate(out.clone(), cancelled.clone(), request_id, steps);
        }
        ValidateScript::TYPE => {
            let validate = codec::decode::<ValidateScript>(text)?.into_data();
            let step = if validate.script_content.trim().is_empty() {
                ("failed", "validation failed".to_string(), Some("script is empty".to_string()))
            } else {
                ("completed", "script is valid".to_string(), None)
            };
            simulate(out.clone(), cancelled.clone(), request_id, vec![step]);
        }
        CancelTask::TYPE => {
            let cancel = codec::decode::<CancelTask>(text)?.into_data();
            tracing::info!("Cancel requested for {}", cancel.target_request_id);
            cancelled.lock().await.insert(cancel.target_request_id);
        }
        other => {
            send(
                out,
                ErrorData {
                    message: format!("unknown message type `{other}`"),
                    code: Some("unknown_type".to_string()),
                },
                request_id.as_deref(),
            );
        }
    }
    Ok(())
}

/// Emit one task update per step, stopping early when the request is cancelled.
fn simulate(
    out: mpsc::UnboundedSender<String>,
    cancelled: Cancelled,
    request_id: Option<String>,
    steps: Vec<(&'static str, String, Option<String>)>,
) {
    tokio::spawn(async move {
        let task_id = request_id.clone().unwrap_or_else(|| "unsolicited".to_string());
        for (status, description, details) in steps {
            tokio::time::sleep(STEP).await;
            if let Some(id) = request_id.as_deref()
                && cancelled.lock().await.remove(id)
            {
                send(&out, update(&task_id, "cancelled", "cancelled by client", None), Some(id));
                return;
            }
            send(&out, update(&task_id, status, &description, details), request_id.as_deref());
        }
    });
}
