//! WebSocket handling
//!
//! Page sockets (`/ws/main`, `/ws/background`) carry bridge frames as text
//! messages. A frame travelling with a port is preceded by a `#port <id>`
//! header line; the port itself is reached on `/ws/port/{id}`. Surfaces use
//! `/ws/surface` and speak JSON.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use hostbridge_core::{BridgeHandle, Inbound, MessagePort, Outbound};
use hostbridge_protocol::{SurfaceEvent, SurfaceReply};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::ports::{split_port_header, with_port_header, PortRegistry};
use crate::state::{HostState, SocketSlot};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub async fn main_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<HostState>,
) -> impl IntoResponse {
    let bridge = state.main.clone();
    ws.on_upgrade(move |socket| {
        handle_page_socket(socket, bridge, state.main_socket, state.ports)
    })
}

/// Starts the background process if needed and attaches to its page bridge.
pub async fn background_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<HostState>,
) -> impl IntoResponse {
    let (_, bridge) = state.background.ensure_running();
    ws.on_upgrade(move |socket| {
        handle_page_socket(socket, bridge, state.background_socket, state.ports)
    })
}

pub async fn port_ws_handler(
    ws: WebSocketUpgrade,
    Path(port_id): Path<String>,
    State(state): State<HostState>,
) -> Response {
    match state.ports.claim(&port_id) {
        Some(port) => ws
            .on_upgrade(move |socket| handle_port_socket(socket, port_id, port))
            .into_response(),
        None => {
            debug!(
                component = "websocket",
                event = "ws.port.unknown",
                port_id = %port_id,
                "No port waiting under this id"
            );
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

pub async fn surface_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<HostState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_surface_socket(socket, state))
}

/// Encode an outbound frame for the page, parking its port if it has one.
fn encode_outbound(conn_id: u64, outbound: Outbound, ports: &PortRegistry) -> String {
    match outbound.port {
        Some(port) => {
            let text = with_port_header(port.id(), &outbound.wire);
            ports.park(conn_id, port.id().to_string(), port);
            text
        }
        None => outbound.wire,
    }
}

/// Decode a page message, creating a port pair when it declares one. The
/// page's end is parked under the id it chose.
fn decode_inbound(conn_id: u64, text: &str, ports: &PortRegistry) -> Inbound {
    let (port_id, wire) = split_port_header(text);
    let port = port_id.map(|id| {
        let (near, far) = MessagePort::pair();
        ports.park(conn_id, id, far);
        near
    });
    Inbound {
        wire: wire.to_string(),
        port,
    }
}

async fn handle_page_socket(
    socket: WebSocket,
    bridge: BridgeHandle,
    slot: Arc<SocketSlot>,
    ports: Arc<PortRegistry>,
) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let role = bridge.role();
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        role = %role,
        "Page connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Outbound>();
    let (control_tx, mut control_rx) = mpsc::channel::<Message>(16);

    let send_ports = ports.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                frame = frame_rx.recv() => match frame {
                    Some(outbound) => Message::Text(encode_outbound(conn_id, outbound, &send_ports).into()),
                    None => {
                        // The bridge dropped our sink: another page took over.
                        debug!(
                            component = "websocket",
                            event = "ws.page.replaced",
                            connection_id = conn_id,
                            "Sink released by bridge, closing socket"
                        );
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                },
                control = control_rx.recv() => match control {
                    Some(message) => message,
                    None => break,
                },
            };

            if ws_tx.send(message).await.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    slot.claim(conn_id);
    bridge.attach(Box::new(frame_tx));

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = control_tx.send(Message::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        bridge.inbound(decode_inbound(conn_id, text.as_str(), &ports));
    }

    if slot.release(conn_id) {
        bridge.detach();
    }
    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        role = %role,
        "Page connection closed"
    );
    send_task.abort();
    ports.release_owner(conn_id);
}

/// Pipe text between a socket and one end of a message port until either
/// side goes away.
async fn handle_port_socket(mut socket: WebSocket, port_id: String, port: MessagePort) {
    let (port_tx, mut port_rx) = port.split();
    debug!(
        component = "websocket",
        event = "ws.port.opened",
        port_id = %port_id,
        "Port connection opened"
    );

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if port_tx.send(text.as_str().to_string()).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if socket.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            outgoing = port_rx.recv() => match outgoing {
                Some(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    debug!(
        component = "websocket",
        event = "ws.port.closed",
        port_id = %port_id,
        "Port connection closed"
    );
}

async fn send_event(socket: &mut WebSocket, event: &SurfaceEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(
                component = "websocket",
                event = "ws.surface.serialize_failed",
                error = %e,
                "Failed to serialize surface event"
            );
            true
        }
    }
}

async fn handle_surface_socket(mut socket: WebSocket, state: HostState) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.surface.opened",
        connection_id = conn_id,
        "Surface connection opened"
    );

    run_surface(&mut socket, &state, conn_id).await;
    surface_closed(&state, conn_id);

    info!(
        component = "websocket",
        event = "ws.surface.closed",
        connection_id = conn_id,
        "Surface connection closed"
    );
}

async fn run_surface(socket: &mut WebSocket, state: &HostState, conn_id: u64) {
    let (replay, mut events) = state.surfaces.subscribe();
    if let Some(launch) = replay {
        if !send_event(socket, &SurfaceEvent::FlowLaunch { launch }).await {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if !send_event(socket, &event).await {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        component = "websocket",
                        event = "ws.surface.lagged",
                        connection_id = conn_id,
                        skipped = skipped,
                        "Surface fell behind, events skipped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_surface_reply(state, conn_id, text.as_str());
                }
                Some(Ok(Message::Ping(data))) => {
                    if socket.send(Message::Pong(data)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Nobody is left to answer the flow the surfaces were showing.
fn surface_closed(state: &HostState, conn_id: u64) {
    let Some(launch) = state.surfaces.disconnected() else {
        return;
    };
    let cancelled = state.arbiter.cancel_active();
    info!(
        component = "websocket",
        event = "ws.surface.flow_abandoned",
        connection_id = conn_id,
        request_code = ?launch.request_code,
        cancelled = cancelled,
        "Last surface left with a flow pending"
    );
}

fn handle_surface_reply(state: &HostState, conn_id: u64, text: &str) {
    match serde_json::from_str::<SurfaceReply>(text) {
        Ok(SurfaceReply::FlowResult { result }) => {
            let request_code = result.request_code;
            // Cleared first: resolving may present the next flow.
            state.surfaces.finished(request_code);
            let delivered = state.arbiter.resolve(result);
            debug!(
                component = "websocket",
                event = "ws.surface.flow_result",
                connection_id = conn_id,
                request_code = ?request_code,
                delivered = delivered,
                "Surface reported flow result"
            );
        }
        Err(e) => {
            warn!(
                component = "websocket",
                event = "ws.surface.parse_failed",
                connection_id = conn_id,
                error = %e,
                payload_bytes = text.len(),
                "Failed to parse surface reply"
            );
        }
    }
}
