//! Capability router
//!
//! Dispatches page-initiated frames by kind. Handlers either answer
//! immediately, hand the request to spawned work that answers later through
//! the bridge, or answer nothing (fire-and-forget kinds). Any failure becomes
//! an `error` frame carrying the failure's description.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hostbridge_protocol::{
    BeginDownload, Frame, FrameKind, ReadStorage, TokenRequest, WriteStorage, NULL_PAYLOAD,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::background::BackgroundHandle;
use crate::bridge::Bridge;
use crate::bridge_command::BridgeCommand;
use crate::channel::MessagePort;
use crate::error::BridgeError;

/// Clipboard label for copied text.
pub const CLIPBOARD_LABEL: &str = "hostbridge";

enum Reply {
    /// Answer now with this payload.
    Now(String),
    /// Spawned work answers through the bridge later.
    Later,
    /// Fire-and-forget kind.
    Nothing,
}

pub(crate) fn route(bridge: &mut Bridge, frame: Frame, port: Option<MessagePort>) {
    let kind = FrameKind::parse(&frame.kind);
    let request_id = frame.request_id.clone();

    debug!(
        component = "router",
        event = "router.dispatch",
        role = %bridge.role(),
        kind = %kind,
        request_id = %request_id,
        payload_len = frame.payload.len(),
        "Dispatching frame"
    );

    let outcome = match kind {
        FrameKind::Connect => connect(bridge, frame, port),
        FrameKind::Message => forward_message(bridge, frame),
        FrameKind::WriteStorage => write_storage(bridge, &frame),
        FrameKind::ReadStorage => read_storage(bridge, &frame),
        FrameKind::BeginDownload => begin_download(bridge, frame),
        FrameKind::RequestToken => request_token(bridge, frame),
        FrameKind::BlockRefresh => block_refresh(bridge, &frame),
        FrameKind::CopyText => copy_text(bridge, &frame),
        FrameKind::RememberKey => remember_key(bridge, &frame),
        FrameKind::RequestUnlock => request_unlock(bridge, frame),
        FrameKind::OpenApp => open_app(bridge),
        other => {
            warn!(
                component = "router",
                event = "router.unknown_kind",
                role = %bridge.role(),
                kind = %other,
                "Ignoring frame of unhandled kind"
            );
            Ok(Reply::Nothing)
        }
    };

    match outcome {
        Ok(Reply::Now(payload)) => bridge.respond(&request_id, Ok(payload)),
        Ok(Reply::Later | Reply::Nothing) => {}
        Err(err) => {
            warn!(
                component = "router",
                event = "router.failed",
                role = %bridge.role(),
                request_id = %request_id,
                error = %err,
                "Frame handling failed"
            );
            bridge.respond(&request_id, Err(err));
        }
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, BridgeError> {
    BASE64
        .decode(encoded)
        .map_err(|err| BridgeError::operation(format!("invalid base64 data: {err}")))
}

// ---------------------------------------------------------------------------
// Background process
// ---------------------------------------------------------------------------

fn connect(
    bridge: &mut Bridge,
    frame: Frame,
    port: Option<MessagePort>,
) -> Result<Reply, BridgeError> {
    let port = port.ok_or_else(|| BridgeError::operation("connect frame carried no port"))?;
    let payload = frame.payload;
    bridge.submit_background(Box::new(move |handle: &BackgroundHandle| {
        handle.connect(port, payload)
    }));
    Ok(Reply::Nothing)
}

fn forward_message(bridge: &mut Bridge, frame: Frame) -> Result<Reply, BridgeError> {
    let handler = bridge.responder(&frame.request_id)?;
    let payload = frame.payload;
    bridge.submit_background(Box::new(move |handle: &BackgroundHandle| {
        handle.message(payload, handler)
    }));
    Ok(Reply::Later)
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

fn write_storage(bridge: &mut Bridge, frame: &Frame) -> Result<Reply, BridgeError> {
    let request: WriteStorage = frame.payload_as()?;
    let storage = &bridge.capabilities().storage;
    if request.value.is_null() {
        storage.delete(&request.key)?;
    } else {
        storage.put(&request.key, &request.value.to_string())?;
    }
    Ok(Reply::Now(NULL_PAYLOAD.to_string()))
}

fn read_storage(bridge: &mut Bridge, frame: &Frame) -> Result<Reply, BridgeError> {
    let request: ReadStorage = frame.payload_as()?;
    let stored = bridge.capabilities().storage.get(&request.key)?;
    Ok(Reply::Now(
        stored.unwrap_or_else(|| NULL_PAYLOAD.to_string()),
    ))
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

fn begin_download(bridge: &mut Bridge, frame: Frame) -> Result<Reply, BridgeError> {
    let request: BeginDownload = frame.payload_as()?;
    let bytes = decode_base64(&request.data)?;
    bridge.begin_download(
        frame.request_id,
        request.filename,
        request.content_type,
        bytes,
    );
    Ok(Reply::Later)
}

fn request_token(bridge: &mut Bridge, frame: Frame) -> Result<Reply, BridgeError> {
    match frame.payload_as::<TokenRequest>()? {
        TokenRequest::None => Ok(Reply::Now(NULL_PAYLOAD.to_string())),
        TokenRequest::Oauth { server_id, user_id } => {
            bridge.begin_oauth(frame.request_id, server_id, user_id);
            Ok(Reply::Later)
        }
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

fn block_refresh(bridge: &mut Bridge, frame: &Frame) -> Result<Reply, BridgeError> {
    let blocked = matches!(frame.payload_as::<Value>(), Ok(Value::Bool(true)));
    bridge.set_refresh_blocked(blocked);
    Ok(Reply::Nothing)
}

fn copy_text(bridge: &mut Bridge, frame: &Frame) -> Result<Reply, BridgeError> {
    let text: String = frame.payload_as()?;
    let copy = bridge
        .capabilities()
        .clipboard
        .set_text(CLIPBOARD_LABEL, &text);
    let request_id = frame.request_id.clone();
    bridge.spawn_marshalled(async move {
        BridgeCommand::Complete {
            request_id,
            outcome: copy
                .await
                .map(|()| NULL_PAYLOAD.to_string())
                .map_err(BridgeError::from),
        }
    });
    Ok(Reply::Later)
}

fn remember_key(bridge: &mut Bridge, frame: &Frame) -> Result<Reply, BridgeError> {
    let encoded: String = frame.payload_as()?;
    let secret = decode_base64(&encoded)?;
    bridge.capabilities().secure_store.remember(secret)?;
    Ok(Reply::Now(NULL_PAYLOAD.to_string()))
}

fn request_unlock(bridge: &mut Bridge, frame: Frame) -> Result<Reply, BridgeError> {
    let recall = bridge.capabilities().secure_store.recall();
    let request_id = frame.request_id;
    bridge.spawn_marshalled(async move {
        BridgeCommand::Unlocked {
            request_id,
            outcome: recall.await,
        }
    });
    Ok(Reply::Later)
}

fn open_app(bridge: &mut Bridge) -> Result<Reply, BridgeError> {
    bridge.capabilities().launcher.open_app()?;
    Ok(Reply::Now(NULL_PAYLOAD.to_string()))
}
