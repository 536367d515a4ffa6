//! WebSocket relays for live run events.
//!
//! Frames sent to clients are `{"type": "started" | "log" | "complete" |
//! "error", "data": ...}`.

use crate::AppState;
use actix_web::{get, web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_ws::{Message, MessageStream, Session};
use futures::StreamExt;
use graphcore::{EventStream, Fields, GraphId, RunEvent, RunId};
use graphruntime::{GraphRuntime, GraphTarget};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

/// First message expected from an `execute` client
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    initial_state: Fields,
}

fn frame(kind: &str, data: serde_json::Value) -> String {
    json!({ "type": kind, "data": data }).to_string()
}

fn error_frame(message: impl ToString) -> String {
    frame("error", json!({ "message": message.to_string() }))
}

/// Execute a graph and stream its log.
///
/// The client sends `{"initial_state": {...}}` after connecting.
#[get("/ws/execute/{graph_id}")]
pub async fn execute_graph(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<GraphId>,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let graph_id = path.into_inner();
    let runtime = data.runtime.clone();

    info!("WebSocket execution requested for graph {}", graph_id);

    actix_web::rt::spawn(async move {
        if let Err(e) = runtime.get_graph(graph_id).await {
            let _ = session.text(error_frame(e)).await;
            let _ = session.close(None).await;
            return;
        }

        let Some(request) = next_request(&mut session, &mut msg_stream).await else {
            let _ = session.close(None).await;
            return;
        };

        match runtime
            .execute_and_stream(GraphTarget::Id(graph_id), request.initial_state)
            .await
        {
            Ok((run_id, events)) => {
                if session.text(frame("started", json!({ "run_id": run_id }))).await.is_ok() {
                    relay(&runtime, run_id, events, 0, &mut session, &mut msg_stream).await;
                }
            }
            Err(e) => {
                let _ = session.text(error_frame(e)).await;
            }
        }

        let _ = session.close(None).await;
    });

    Ok(res)
}

/// Follow an existing run: its log so far, then live events
#[get("/ws/monitor/{run_id}")]
pub async fn monitor_run(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<RunId>,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let run_id = path.into_inner();
    let runtime = data.runtime.clone();

    info!("WebSocket monitoring requested for run {}", run_id);

    actix_web::rt::spawn(async move {
        // subscribe before the snapshot so nothing falls between the two
        let events = match runtime.subscribe_events(run_id).await {
            Ok(events) => events,
            Err(e) => {
                let _ = session.text(error_frame(e)).await;
                let _ = session.close(None).await;
                return;
            }
        };

        let snapshot = match runtime.get_run_state(run_id).await {
            Ok(run) => run.state.log,
            Err(e) => {
                let _ = session.text(error_frame(e)).await;
                let _ = session.close(None).await;
                return;
            }
        };

        let seen = snapshot.len() as u64;
        for entry in snapshot {
            if session.text(frame("log", json!(entry))).await.is_err() {
                return;
            }
        }

        relay(&runtime, run_id, events, seen, &mut session, &mut msg_stream).await;
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// Wait for the client's execute request
async fn next_request(session: &mut Session, msg_stream: &mut MessageStream) -> Option<ExecuteRequest> {
    while let Some(Ok(msg)) = msg_stream.recv().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ExecuteRequest>(&text) {
                Ok(request) => return Some(request),
                Err(e) => {
                    let _ = session.text(error_frame(format!("Invalid JSON format: {}", e))).await;
                    return None;
                }
            },
            Message::Ping(bytes) => {
                if session.pong(&bytes).await.is_err() {
                    return None;
                }
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Forward run events until the run finishes or the client leaves.
/// Log entries with `seq` below `skip_below` were already sent.
async fn relay(
    runtime: &GraphRuntime,
    run_id: RunId,
    mut events: EventStream,
    skip_below: u64,
    session: &mut Session,
    msg_stream: &mut MessageStream,
) {
    loop {
        tokio::select! {
            event = events.next() => {
                let text = match event {
                    Some(RunEvent::Log { entry, .. }) if entry.seq < skip_below => continue,
                    Some(RunEvent::Log { entry, .. }) => frame("log", json!(entry)),
                    Some(RunEvent::Finished { status, error, .. }) => {
                        let final_state = runtime
                            .get_run_state(run_id)
                            .await
                            .map(|run| json!(run.state.fields))
                            .unwrap_or(serde_json::Value::Null);
                        let complete = frame(
                            "complete",
                            json!({ "status": status, "final_state": final_state, "error": error }),
                        );
                        let _ = session.text(complete).await;
                        info!("WebSocket stream completed for run {}", run_id);
                        return;
                    }
                    None => {
                        warn!("Event stream of run {} ended without a terminal event", run_id);
                        return;
                    }
                };
                if session.text(text).await.is_err() {
                    info!("WebSocket client disconnected from run {}", run_id);
                    return;
                }
            }

            // Handle incoming WebSocket messages (ping/pong)
            Some(Ok(msg)) = msg_stream.recv() => {
                match msg {
                    Message::Ping(bytes) => {
                        if session.pong(&bytes).await.is_err() {
                            return;
                        }
                    }
                    Message::Close(_) => {
                        info!("WebSocket client closed stream of run {}", run_id);
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}
