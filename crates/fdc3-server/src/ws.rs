//! WebSocket connection handling.
//!
//! A connection speaks for exactly one app instance. The first frame must
//! be a hello naming the instance, app, and session; it is answered with
//! an explicit accept or reject before anything else flows. After that,
//! requests are handled inline in arrival order, except the two that
//! suspend on another app (raiseIntent, open): those run concurrently so a
//! raise awaiting its ack never blocks the acks arriving on the same
//! socket. Broker events ride the socket via the instance's transport
//! queue.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fdc3_broker::Broker;
use fdc3_core::errors::Fdc3Error;
use fdc3_core::ids::InstanceId;
use fdc3_core::protocol::{ClientRequest, WireError, WireRequest, WireResponse};

use crate::AppState;
use crate::handler;
use crate::metrics::{WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Upgrade handler for `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    let (mut sink, mut stream) = socket.split();

    let Some((broker, instance, events_rx)) = handshake(&mut sink, &mut stream, &state).await
    else {
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        let _ = sink.close().await;
        return;
    };

    // Responses and broker events share the socket; a writer task merges
    // the two queues so the read loop never touches the sink.
    let (resp_tx, resp_rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(write_loop(sink, events_rx, resp_rx));

    read_loop(&mut stream, &broker, &instance, &resp_tx).await;

    drop(resp_tx);
    state.transport.unbind(&instance);
    broker.disconnect(&instance);
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    writer.abort();
    info!(instance = %instance, "connection closed");
}

/// Run the hello exchange. Returns the bound session broker on success;
/// on failure the rejection has already been written.
async fn handshake(
    sink: &mut SplitSink<WebSocket, Message>,
    stream: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> Option<(Arc<Broker>, InstanceId, mpsc::Receiver<Arc<String>>)> {
    let request = loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => match serde_json::from_str::<WireRequest>(text.as_str()) {
                Ok(request) => break request,
                Err(e) => {
                    warn!(error = %e, "malformed handshake frame");
                    send_response(sink, reject("", "malformed handshake")).await;
                    return None;
                }
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            // Pings are answered by axum; anything else is ignored.
            Ok(_) => {}
        }
    };

    let ClientRequest::Hello { instance_id, app_id, session_id } = request.body else {
        warn!("first frame was not a hello");
        send_response(sink, reject(&request.request_id, "handshake required")).await;
        return None;
    };

    let broker = state.sessions.get_or_create(&session_id);
    let events_rx = state.transport.bind(&instance_id);
    match broker.hello(&instance_id, &app_id).await {
        Ok(()) => {
            debug!(instance = %instance_id, session = %session_id, "handshake accepted");
            send_response(
                sink,
                WireResponse {
                    request_id: request.request_id,
                    result: Some(serde_json::json!({ "instanceId": instance_id })),
                    error: None,
                },
            )
            .await;
            Some((broker, instance_id, events_rx))
        }
        Err(e) => {
            // Explicit rejection, never a hung promise.
            warn!(instance = %instance_id, error = %e, "handshake rejected");
            state.transport.unbind(&instance_id);
            send_response(
                sink,
                WireResponse {
                    request_id: request.request_id,
                    result: None,
                    error: Some(WireError::from(&e)),
                },
            )
            .await;
            None
        }
    }
}

async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    broker: &Arc<Broker>,
    instance: &InstanceId,
    resp_tx: &mpsc::Sender<String>,
) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let request = match serde_json::from_str::<WireRequest>(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                warn!(instance = %instance, error = %e, "ignoring malformed frame");
                continue;
            }
        };
        if suspends_on_peer(&request.body) {
            // raiseIntent and open park on acks or handshakes delivered
            // through this same read loop, so they must not occupy it.
            let broker = Arc::clone(broker);
            let instance = instance.clone();
            let resp_tx = resp_tx.clone();
            drop(tokio::spawn(async move {
                respond(&broker, &instance, request, &resp_tx).await;
            }));
        } else {
            // Everything else is handled inline, keeping the broker's view
            // of one connection strictly in arrival order.
            respond(broker, instance, request, resp_tx).await;
        }
    }
}

/// Requests whose dispatch waits on another app instance.
fn suspends_on_peer(body: &ClientRequest) -> bool {
    matches!(
        body,
        ClientRequest::RaiseIntent { .. } | ClientRequest::Open { .. }
    )
}

async fn respond(
    broker: &Arc<Broker>,
    instance: &InstanceId,
    request: WireRequest,
    resp_tx: &mpsc::Sender<String>,
) {
    let response = handler::dispatch(broker, instance, request).await;
    match serde_json::to_string(&response) {
        Ok(json) => {
            if resp_tx.send(json).await.is_err() {
                debug!(instance = %instance, "connection gone before response");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize response"),
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut events_rx: mpsc::Receiver<Arc<String>>,
    mut resp_rx: mpsc::Receiver<String>,
) {
    loop {
        let frame = tokio::select! {
            event = events_rx.recv() => event.map(|json| (*json).clone()),
            response = resp_rx.recv() => response,
        };
        let Some(json) = frame else { break };
        if sink.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn send_response(sink: &mut SplitSink<WebSocket, Message>, response: WireResponse) {
    match serde_json::to_string(&response) {
        Ok(json) => {
            let _ = sink.send(Message::Text(json.into())).await;
        }
        Err(e) => warn!(error = %e, "failed to serialize handshake response"),
    }
}

fn reject(request_id: &str, message: &str) -> WireResponse {
    let error = Fdc3Error::InvalidInstance(message.to_string());
    WireResponse {
        request_id: request_id.to_string(),
        result: None,
        error: Some(WireError::from(&error)),
    }
}
