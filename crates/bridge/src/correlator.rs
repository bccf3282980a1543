//! Request/response correlation
//!
//! Issues request ids, remembers who is waiting on each one, and writes
//! every outbound frame through the bridge [`Channel`].

use std::collections::HashMap;

use hostbridge_protocol::{encode, Frame, FrameKind};
use tokio::sync::oneshot;
use tracing::debug;

use crate::channel::{Channel, FrameSink, MessagePort, Outbound};
use crate::error::BridgeError;

/// Continuation for a correlated request. Exactly one method is called.
pub trait ResponseHandler: Send {
    fn on_response(self: Box<Self>, payload: String);
    fn on_error(self: Box<Self>, payload: String);
}

/// `Ok(payload)` for a `response` frame, `Err(payload)` for an `error` frame.
/// Both payloads are raw JSON text.
pub type ReplyResult = Result<String, String>;

impl ResponseHandler for oneshot::Sender<ReplyResult> {
    fn on_response(self: Box<Self>, payload: String) {
        let _ = (*self).send(Ok(payload));
    }

    fn on_error(self: Box<Self>, payload: String) {
        let _ = (*self).send(Err(payload));
    }
}

pub struct Correlator {
    next_request_id: u64,
    pending: HashMap<String, Box<dyn ResponseHandler>>,
    channel: Channel,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_request_id: 1,
            pending: HashMap::new(),
            channel: Channel::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.channel.is_ready()
    }

    pub fn buffered_len(&self) -> usize {
        self.channel.buffered_len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Attach the page sink. The `inject` bootstrap goes out first, then
    /// anything buffered.
    pub fn attach(&mut self, sink: Box<dyn FrameSink>) -> usize {
        let bootstrap = Outbound::text(encode(
            FrameKind::Inject.as_str(),
            "",
            hostbridge_protocol::NULL_PAYLOAD,
        ));
        self.channel.attach(sink, Some(bootstrap))
    }

    pub fn detach(&mut self) {
        self.channel.detach();
    }

    /// Fire-and-forget frame.
    pub fn send(&mut self, kind: &str, payload: &str) {
        self.post(kind, "", payload, None);
    }

    /// Fire-and-forget frame carrying a port.
    pub fn send_with_port(&mut self, kind: &str, payload: &str, port: MessagePort) {
        self.post(kind, "", payload, Some(port));
    }

    /// Correlated request. Returns the id allocated for it.
    pub fn request(
        &mut self,
        kind: &str,
        payload: &str,
        handler: Box<dyn ResponseHandler>,
    ) -> String {
        let request_id = self.next_request_id.to_string();
        self.next_request_id += 1;
        self.pending.insert(request_id.clone(), handler);
        self.post(kind, &request_id, payload, None);
        request_id
    }

    /// Answer a request the page made. Fire-and-forget requests get nothing.
    pub fn respond(&mut self, request_id: &str, outcome: Result<String, BridgeError>) {
        if request_id.is_empty() {
            if let Err(err) = outcome {
                debug!(
                    component = "correlator",
                    event = "correlator.respond.unanswerable_error",
                    error = %err,
                    "Dropping error for fire-and-forget frame"
                );
            }
            return;
        }
        match outcome {
            Ok(payload) => self.post(FrameKind::Response.as_str(), request_id, &payload, None),
            Err(err) => self.post(
                FrameKind::Error.as_str(),
                request_id,
                &err.to_payload(),
                None,
            ),
        }
    }

    /// Forward a raw reply from elsewhere (e.g. the background page).
    pub fn relay(&mut self, request_id: &str, reply: ReplyResult) {
        if request_id.is_empty() {
            return;
        }
        match reply {
            Ok(payload) => self.post(FrameKind::Response.as_str(), request_id, &payload, None),
            Err(payload) => self.post(FrameKind::Error.as_str(), request_id, &payload, None),
        }
    }

    /// Resolve a pending request from a `response`/`error` frame.
    ///
    /// Returns false for unknown or already-resolved ids; such frames are
    /// dropped.
    pub fn resolve(&mut self, frame: Frame) -> bool {
        let Some(handler) = self.pending.remove(&frame.request_id) else {
            debug!(
                component = "correlator",
                event = "correlator.resolve.stale",
                request_id = %frame.request_id,
                kind = %frame.kind,
                "No pending request for reply"
            );
            return false;
        };
        if frame.kind == FrameKind::Response.as_str() {
            handler.on_response(frame.payload);
        } else {
            handler.on_error(frame.payload);
        }
        true
    }

    fn post(&mut self, kind: &str, request_id: &str, payload: &str, port: Option<MessagePort>) {
        self.channel.post(Outbound {
            wire: encode(kind, request_id, payload),
            port,
        });
    }
}
