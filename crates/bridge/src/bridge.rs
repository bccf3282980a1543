//! Bridge actor: owns one bridge's state and processes commands sequentially.
//!
//! Each bridge runs as an independent tokio task. External callers
//! communicate via [`BridgeHandle`], which sends [`BridgeCommand`]s over an
//! mpsc channel. Slow work (token fetches, document writes, presence-gated
//! recall, background binds) is spawned and its completion is marshalled back
//! as another command, so bridge state is only ever touched by the actor.
//! Lock-free status reads go through `ArcSwap`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hostbridge_protocol::{
    decode, quote, to_payload, FlowRequest, FlowResult, FlowResultCode, FrameKind,
    StorageChanged, NULL_PAYLOAD,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::background::{
    BackgroundBinder, BackgroundHandle, BackgroundLink, DeferredAction, LinkPhase, Submitted,
};
use crate::bridge_command::{BridgeCommand, FlowTarget};
use crate::capabilities::Capabilities;
use crate::channel::{FrameSink, Inbound, MessagePort};
use crate::correlator::{Correlator, ReplyResult, ResponseHandler};
use crate::error::BridgeError;
use crate::oauth::{self, OauthEffect, OauthInput, OauthSession};
use crate::router;
use crate::ui_flow::{FlowCallback, UiFlowArbiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeRole {
    /// The main page's bridge; reaches the background process through a link.
    Main,
    /// The background page's own bridge.
    Background,
}

impl fmt::Display for BridgeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("main"),
            Self::Background => f.write_str("background"),
        }
    }
}

pub struct BridgeConfig {
    role: BridgeRole,
    capabilities: Capabilities,
    arbiter: Arc<UiFlowArbiter>,
    binder: Option<Arc<dyn BackgroundBinder>>,
}

impl BridgeConfig {
    pub fn main(
        capabilities: Capabilities,
        arbiter: Arc<UiFlowArbiter>,
        binder: Arc<dyn BackgroundBinder>,
    ) -> Self {
        Self {
            role: BridgeRole::Main,
            capabilities,
            arbiter,
            binder: Some(binder),
        }
    }

    pub fn background(capabilities: Capabilities, arbiter: Arc<UiFlowArbiter>) -> Self {
        Self {
            role: BridgeRole::Background,
            capabilities,
            arbiter,
            binder: None,
        }
    }
}

/// Point-in-time view of a bridge, published after every command
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub role: BridgeRole,
    pub channel_ready: bool,
    pub buffered_frames: usize,
    pub pending_requests: usize,
    pub refresh_blocked: bool,
    pub background: LinkPhase,
    /// Actions waiting for the background process to bind
    pub background_queued: usize,
    pub oauth_sessions: usize,
    pub pending_downloads: usize,
}

impl BridgeStatus {
    fn initial(role: BridgeRole) -> Self {
        Self {
            role,
            channel_ready: false,
            buffered_frames: 0,
            pending_requests: 0,
            refresh_blocked: false,
            background: LinkPhase::Unbound,
            background_queued: 0,
            oauth_sessions: 0,
            pending_downloads: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running bridge actor (cheap to Clone).
#[derive(Clone)]
pub struct BridgeHandle {
    role: BridgeRole,
    command_tx: mpsc::UnboundedSender<BridgeCommand>,
    status: Arc<ArcSwap<BridgeStatus>>,
}

impl BridgeHandle {
    /// Spawn a bridge actor and its storage-change forwarder.
    pub fn spawn(config: BridgeConfig) -> BridgeHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let changes = config.capabilities.storage.subscribe();
        let bridge = Bridge::new(config, command_tx.downgrade());
        let role = bridge.role;
        let status = bridge.status.clone();

        forward_storage_changes(role, changes, command_tx.downgrade());
        tokio::spawn(bridge.run(command_rx));

        BridgeHandle {
            role,
            command_tx,
            status,
        }
    }

    pub fn role(&self) -> BridgeRole {
        self.role
    }

    /// Send a command to the actor (fire-and-forget).
    pub fn dispatch(&self, cmd: BridgeCommand) -> bool {
        match self.command_tx.send(cmd) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    component = "bridge",
                    event = "bridge.dispatch.closed",
                    role = %self.role,
                    command = err.0.name(),
                    "Bridge channel closed, command dropped"
                );
                false
            }
        }
    }

    pub fn attach(&self, sink: Box<dyn FrameSink>) {
        self.dispatch(BridgeCommand::Attach { sink });
    }

    pub fn detach(&self) {
        self.dispatch(BridgeCommand::Detach);
    }

    pub fn inbound(&self, inbound: Inbound) {
        self.dispatch(BridgeCommand::Inbound(inbound));
    }

    pub fn send(&self, kind: impl Into<String>, payload: impl Into<String>) {
        self.dispatch(BridgeCommand::Send {
            kind: kind.into(),
            payload: payload.into(),
            port: None,
        });
    }

    pub fn send_with_port(
        &self,
        kind: impl Into<String>,
        payload: impl Into<String>,
        port: MessagePort,
    ) {
        self.dispatch(BridgeCommand::Send {
            kind: kind.into(),
            payload: payload.into(),
            port: Some(port),
        });
    }

    pub fn request_with_handler(
        &self,
        kind: impl Into<String>,
        payload: impl Into<String>,
        handler: Box<dyn ResponseHandler>,
    ) {
        self.dispatch(BridgeCommand::Request {
            kind: kind.into(),
            payload: payload.into(),
            handler,
        });
    }

    /// Correlated request to the page. An `error` reply comes back as
    /// [`BridgeError::Operation`] carrying the page's description.
    pub async fn request(
        &self,
        kind: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<String, BridgeError> {
        let (tx, rx) = oneshot::channel::<ReplyResult>();
        self.request_with_handler(kind, payload, Box::new(tx));
        match rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(payload)) => Err(BridgeError::Operation(
                serde_json::from_str::<String>(&payload).unwrap_or(payload),
            )),
            Err(_) => Err(BridgeError::ConnectionLost(format!(
                "{} bridge stopped",
                self.role
            ))),
        }
    }

    /// Host-initiated command for the background page.
    pub fn host_command(&self, command_id: impl Into<String>) {
        self.dispatch(BridgeCommand::HostCommand {
            command_id: command_id.into(),
        });
    }

    pub fn shutdown(&self) {
        self.dispatch(BridgeCommand::Shutdown);
    }

    /// Lock-free status read.
    pub fn status(&self) -> Arc<BridgeStatus> {
        self.status.load_full()
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Resolves once the actor has stopped.
    pub async fn closed(&self) {
        self.command_tx.closed().await;
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct PendingDownload {
    request_id: String,
    bytes: Vec<u8>,
}

pub struct Bridge {
    role: BridgeRole,
    correlator: Correlator,
    capabilities: Capabilities,
    arbiter: Arc<UiFlowArbiter>,
    binder: Option<Arc<dyn BackgroundBinder>>,
    link: BackgroundLink<BackgroundHandle>,
    link_generation: u64,
    oauth_sessions: HashMap<u64, OauthSession>,
    downloads: HashMap<u64, PendingDownload>,
    next_task_id: u64,
    refresh_blocked: bool,
    marshal: mpsc::WeakUnboundedSender<BridgeCommand>,
    status: Arc<ArcSwap<BridgeStatus>>,
}

impl Bridge {
    fn new(config: BridgeConfig, marshal: mpsc::WeakUnboundedSender<BridgeCommand>) -> Self {
        Self {
            role: config.role,
            correlator: Correlator::new(),
            capabilities: config.capabilities,
            arbiter: config.arbiter,
            binder: config.binder,
            link: BackgroundLink::new(),
            link_generation: 0,
            oauth_sessions: HashMap::new(),
            downloads: HashMap::new(),
            next_task_id: 1,
            refresh_blocked: false,
            marshal,
            status: Arc::new(ArcSwap::from_pointee(BridgeStatus::initial(config.role))),
        }
    }

    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<BridgeCommand>) {
        info!(
            component = "bridge",
            event = "bridge.started",
            role = %self.role,
            "Bridge started"
        );
        while let Some(cmd) = command_rx.recv().await {
            if !self.handle(cmd) {
                break;
            }
            self.publish_status();
        }
        info!(
            component = "bridge",
            event = "bridge.stopped",
            role = %self.role,
            pending_requests = self.correlator.pending_count(),
            "Bridge stopped"
        );
    }

    /// Process one command. Returns false when the actor should stop.
    fn handle(&mut self, cmd: BridgeCommand) -> bool {
        match cmd {
            BridgeCommand::Attach { sink } => {
                let flushed = self.correlator.attach(sink);
                info!(
                    component = "bridge",
                    event = "bridge.attached",
                    role = %self.role,
                    flushed,
                    "Page attached"
                );
            }
            BridgeCommand::Detach => {
                self.correlator.detach();
                info!(
                    component = "bridge",
                    event = "bridge.detached",
                    role = %self.role,
                    "Page detached, buffering outbound frames"
                );
            }
            BridgeCommand::Inbound(inbound) => self.on_inbound(inbound),

            BridgeCommand::Send {
                kind,
                payload,
                port,
            } => match port {
                Some(port) => self.correlator.send_with_port(&kind, &payload, port),
                None => self.correlator.send(&kind, &payload),
            },
            BridgeCommand::Request {
                kind,
                payload,
                handler,
            } => {
                self.correlator.request(&kind, &payload, handler);
            }
            BridgeCommand::HostCommand { command_id } => self.host_command(command_id),

            BridgeCommand::Complete {
                request_id,
                outcome,
            } => self.respond(&request_id, outcome),
            BridgeCommand::Relay { request_id, reply } => {
                self.correlator.relay(&request_id, reply)
            }
            BridgeCommand::Unlocked {
                request_id,
                outcome,
            } => match outcome {
                Ok(Some(secret)) => {
                    self.correlator.send(
                        FrameKind::UnlockWithKey.as_str(),
                        &quote(&BASE64.encode(secret)),
                    );
                    self.respond(&request_id, Ok(NULL_PAYLOAD.to_string()));
                }
                Ok(None) => self.respond(&request_id, Ok(NULL_PAYLOAD.to_string())),
                Err(err) => self.respond(&request_id, Err(err.into())),
            },
            BridgeCommand::FlowFinished { target, result } => match target {
                FlowTarget::Oauth(session_id) => {
                    let input = match result {
                        Some(result) => OauthInput::FlowReturned(result),
                        None => OauthInput::FlowCancelled,
                    };
                    self.drive_oauth(session_id, input);
                }
                FlowTarget::Download(download_id) => self.finish_download(download_id, result),
            },
            BridgeCommand::Oauth { session_id, input } => self.drive_oauth(session_id, input),

            BridgeCommand::BackgroundBound { generation, handle } => {
                self.on_background_bound(generation, handle)
            }
            BridgeCommand::BackgroundBindFailed { generation, error } => {
                if generation == self.link_generation {
                    warn!(
                        component = "bridge",
                        event = "bridge.background.bind_failed",
                        role = %self.role,
                        queued = self.link.deferred_len(),
                        error = %error,
                        "Background bind failed, queued actions wait for the next bind"
                    );
                    self.link.on_bind_failed();
                }
            }
            BridgeCommand::BackgroundDisconnected { generation } => {
                if generation == self.link_generation && self.link.phase() == LinkPhase::Bound {
                    self.link.on_disconnected();
                    info!(
                        component = "bridge",
                        event = "bridge.background.disconnected",
                        role = %self.role,
                        "Background process disconnected"
                    );
                }
            }

            BridgeCommand::StorageChanged { key } => {
                match to_payload(&StorageChanged { key }) {
                    Ok(payload) => self
                        .correlator
                        .send(FrameKind::StorageChanged.as_str(), &payload),
                    Err(err) => warn!(
                        component = "bridge",
                        event = "bridge.storage_changed.encode_failed",
                        error = %err,
                        "Failed to encode storage notification"
                    ),
                }
            }

            BridgeCommand::Shutdown => return false,
        }
        true
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        let frame = match decode(&inbound.wire) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    component = "bridge",
                    event = "bridge.inbound.malformed",
                    role = %self.role,
                    error = %err,
                    wire_len = inbound.wire.len(),
                    "Dropping malformed frame"
                );
                return;
            }
        };

        if FrameKind::parse(&frame.kind).is_correlation() {
            self.correlator.resolve(frame);
        } else {
            router::route(self, frame, inbound.port);
        }
    }

    fn publish_status(&self) {
        self.status.store(Arc::new(BridgeStatus {
            role: self.role,
            channel_ready: self.correlator.is_ready(),
            buffered_frames: self.correlator.buffered_len(),
            pending_requests: self.correlator.pending_count(),
            refresh_blocked: self.refresh_blocked,
            background: self.link.phase(),
            background_queued: self.link.deferred_len(),
            oauth_sessions: self.oauth_sessions.len(),
            pending_downloads: self.downloads.len(),
        }));
    }

    // -- Used by the router --

    pub(crate) fn role(&self) -> BridgeRole {
        self.role
    }

    pub(crate) fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub(crate) fn respond(&mut self, request_id: &str, outcome: Result<String, BridgeError>) {
        self.correlator.respond(request_id, outcome);
    }

    pub(crate) fn set_refresh_blocked(&mut self, blocked: bool) {
        if self.refresh_blocked != blocked {
            debug!(
                component = "bridge",
                event = "bridge.refresh_blocked",
                role = %self.role,
                blocked,
                "Refresh block changed"
            );
        }
        self.refresh_blocked = blocked;
    }

    /// Run `work` off the actor and feed its result back in as a command.
    pub(crate) fn spawn_marshalled<F>(&self, work: F)
    where
        F: Future<Output = BridgeCommand> + Send + 'static,
    {
        let Some(tx) = self.marshal.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let _ = tx.send(work.await);
        });
    }

    /// Handler that relays a reply from elsewhere back under `request_id`.
    pub(crate) fn responder(
        &self,
        request_id: &str,
    ) -> Result<Box<dyn ResponseHandler>, BridgeError> {
        let tx = self.marshal.upgrade().ok_or_else(|| {
            BridgeError::ConnectionLost(format!("{} bridge stopping", self.role))
        })?;
        Ok(Box::new(Responder {
            request_id: request_id.to_string(),
            tx: Some(tx),
        }))
    }

    /// Run `action` against the background process, binding it first if
    /// needed.
    pub(crate) fn submit_background(&mut self, action: DeferredAction<BackgroundHandle>) {
        let Some(binder) = self.binder.clone() else {
            // Dropping the action fails any response handler it owns.
            warn!(
                component = "bridge",
                event = "bridge.background.no_link",
                role = %self.role,
                "No background link from this bridge"
            );
            return;
        };

        if let Submitted::Queued {
            bind_requested: true,
        } = self.link.submit(action)
        {
            self.link_generation += 1;
            let generation = self.link_generation;
            info!(
                component = "bridge",
                event = "bridge.background.binding",
                role = %self.role,
                generation,
                "Binding background process"
            );
            let bind = binder.bind();
            self.spawn_marshalled(async move {
                match bind.await {
                    Ok(handle) => BridgeCommand::BackgroundBound { generation, handle },
                    Err(error) => BridgeCommand::BackgroundBindFailed { generation, error },
                }
            });
        }
    }

    fn on_background_bound(&mut self, generation: u64, handle: BackgroundHandle) {
        if generation != self.link_generation || self.link.phase() != LinkPhase::Binding {
            debug!(
                component = "bridge",
                event = "bridge.background.stale_bind",
                role = %self.role,
                generation,
                "Ignoring stale bind"
            );
            return;
        }

        let watcher = handle.clone();
        let marshal = self.marshal.clone();
        tokio::spawn(async move {
            watcher.closed().await;
            if let Some(tx) = marshal.upgrade() {
                let _ = tx.send(BridgeCommand::BackgroundDisconnected { generation });
            }
        });

        let drained = self.link.on_bound(handle);
        info!(
            component = "bridge",
            event = "bridge.background.bound",
            role = %self.role,
            generation,
            drained,
            "Background process bound"
        );
    }

    fn host_command(&mut self, command_id: String) {
        if self.binder.is_some() {
            self.submit_background(Box::new(move |handle: &BackgroundHandle| {
                handle.command(command_id)
            }));
        } else {
            self.correlator
                .send(FrameKind::ExecuteCommand.as_str(), &quote(&command_id));
        }
    }

    fn next_task_id(&mut self) -> u64 {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id
    }

    fn flow_callback(&self, target: FlowTarget) -> Option<Box<dyn FlowCallback>> {
        let tx = self.marshal.upgrade()?;
        Some(Box::new(MarshalledFlow { target, tx }))
    }

    // -- Documents --

    pub(crate) fn begin_download(
        &mut self,
        request_id: String,
        filename: String,
        content_type: String,
        bytes: Vec<u8>,
    ) {
        let download_id = self.next_task_id();
        let Some(callback) = self.flow_callback(FlowTarget::Download(download_id)) else {
            return;
        };
        debug!(
            component = "bridge",
            event = "bridge.download.started",
            role = %self.role,
            download_id,
            bytes = bytes.len(),
            "Asking for a document location"
        );
        self.downloads
            .insert(download_id, PendingDownload { request_id, bytes });
        self.arbiter.start(
            FlowRequest::CreateDocument {
                filename,
                content_type,
            },
            callback,
        );
    }

    fn finish_download(&mut self, download_id: u64, result: Option<FlowResult>) {
        let Some(download) = self.downloads.remove(&download_id) else {
            return;
        };
        let location = result
            .as_ref()
            .filter(|result| result.result_code == FlowResultCode::Ok)
            .and_then(FlowResult::document_path)
            .map(str::to_string);

        let Some(location) = location else {
            self.respond(&download.request_id, Err(BridgeError::FlowCancelled));
            return;
        };

        let request_id = download.request_id;
        let write = self
            .capabilities
            .documents
            .write(location, download.bytes);
        self.spawn_marshalled(async move {
            BridgeCommand::Complete {
                request_id,
                outcome: write
                    .await
                    .map(|()| NULL_PAYLOAD.to_string())
                    .map_err(BridgeError::from),
            }
        });
    }

    // -- OAuth --

    pub(crate) fn begin_oauth(
        &mut self,
        request_id: String,
        provider_id: String,
        account_id: String,
    ) {
        let session_id = self.next_task_id();
        info!(
            component = "bridge",
            event = "bridge.oauth.started",
            role = %self.role,
            session_id,
            provider_id = %provider_id,
            known_identity = !account_id.is_empty(),
            "Token request started"
        );
        self.oauth_sessions.insert(
            session_id,
            OauthSession::new(provider_id, account_id, request_id),
        );
        self.drive_oauth(session_id, OauthInput::Begin);
    }

    fn drive_oauth(&mut self, session_id: u64, input: OauthInput) {
        let Some(session) = self.oauth_sessions.remove(&session_id) else {
            debug!(
                component = "bridge",
                event = "bridge.oauth.stale_input",
                role = %self.role,
                session_id,
                "Input for a finished token request"
            );
            return;
        };

        let (session, effects) = oauth::transition(session, input);
        let request_id = session.request_id.clone();
        if !session.is_finished() {
            self.oauth_sessions.insert(session_id, session);
        }

        for effect in effects {
            match effect {
                OauthEffect::StartFlow(flow) => {
                    if let Some(callback) = self.flow_callback(FlowTarget::Oauth(session_id)) {
                        self.arbiter.start(flow, callback);
                    }
                }
                OauthEffect::FetchToken { account, scope } => {
                    let fetch = self.capabilities.tokens.fetch_token(account, scope);
                    self.spawn_marshalled(async move {
                        BridgeCommand::Oauth {
                            session_id,
                            input: OauthInput::TokenFetched(fetch.await),
                        }
                    });
                }
                OauthEffect::Resolve(outcome) => {
                    info!(
                        component = "bridge",
                        event = "bridge.oauth.resolved",
                        role = %self.role,
                        session_id,
                        ok = outcome.is_ok(),
                        "Token request finished"
                    );
                    let outcome =
                        outcome.and_then(|grant| to_payload(&grant).map_err(BridgeError::from));
                    self.respond(&request_id, outcome);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Continuations marshalled back onto the actor
// ---------------------------------------------------------------------------

/// Relays a reply from the background page back to a request of this
/// bridge. Dropped unanswered, it fails the request.
struct Responder {
    request_id: String,
    tx: Option<mpsc::UnboundedSender<BridgeCommand>>,
}

impl Responder {
    fn finish(&mut self, reply: ReplyResult) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(BridgeCommand::Relay {
                request_id: std::mem::take(&mut self.request_id),
                reply,
            });
        }
    }
}

impl ResponseHandler for Responder {
    fn on_response(mut self: Box<Self>, payload: String) {
        self.finish(Ok(payload));
    }

    fn on_error(mut self: Box<Self>, payload: String) {
        self.finish(Err(payload));
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.tx.is_some() {
            let err = BridgeError::ConnectionLost("stopped before replying".into());
            self.finish(Err(err.to_payload()));
        }
    }
}

struct MarshalledFlow {
    target: FlowTarget,
    tx: mpsc::UnboundedSender<BridgeCommand>,
}

impl FlowCallback for MarshalledFlow {
    fn on_result(self: Box<Self>, result: FlowResult) {
        let _ = self.tx.send(BridgeCommand::FlowFinished {
            target: self.target,
            result: Some(result),
        });
    }

    fn on_cancel(self: Box<Self>) {
        let _ = self.tx.send(BridgeCommand::FlowFinished {
            target: self.target,
            result: None,
        });
    }
}

/// Forward key-value changes to the page as `storageChanged` frames for as
/// long as the bridge is alive.
fn forward_storage_changes(
    role: BridgeRole,
    mut changes: broadcast::Receiver<String>,
    marshal: mpsc::WeakUnboundedSender<BridgeCommand>,
) {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(key) => {
                    let Some(tx) = marshal.upgrade() else {
                        break;
                    };
                    if tx.send(BridgeCommand::StorageChanged { key }).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        component = "bridge",
                        event = "bridge.storage_changed.lagged",
                        role = %role,
                        skipped,
                        "Storage notifications dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundCommand;
    use crate::test_support::{assert_quiet, next_wire, wait_until, FakeBinder, TestBridge};

    #[tokio::test]
    async fn attach_sends_inject_then_flushes_buffer_in_order() {
        let mut bridge = TestBridge::detached_main().await;
        bridge.handle.send("storageChanged", r#"{"key":"a"}"#);
        bridge.handle.send("executeCommand", "\"sync\"");
        bridge.attach();

        assert_eq!(bridge.next().await, "inject::null");
        assert_eq!(bridge.next().await, r#"storageChanged::{"key":"a"}"#);
        assert_eq!(bridge.next().await, "executeCommand::\"sync\"");
    }

    #[tokio::test]
    async fn host_request_resolves_from_page_response() {
        let mut bridge = TestBridge::main().await;
        let handle = bridge.handle.clone();
        let request = tokio::spawn(async move { handle.request("message", "{\"q\":1}").await });

        assert_eq!(bridge.next().await, "message:1:{\"q\":1}");
        bridge.frame("response:1:\"pong\"");
        assert_eq!(request.await.unwrap().unwrap(), "\"pong\"");
    }

    #[tokio::test]
    async fn host_request_surfaces_page_error() {
        let mut bridge = TestBridge::main().await;
        let handle = bridge.handle.clone();
        let request = tokio::spawn(async move { handle.request("message", "{}").await });

        bridge.next().await;
        bridge.frame("error:1:\"locked\"");
        let err = request.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "locked");
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_bridge_keeps_going() {
        let mut bridge = TestBridge::main().await;
        bridge.frame("ping");
        bridge.frame("readStorage:1:{\"key\":\"missing\"}");
        assert_eq!(bridge.next().await, "response:1:null");
    }

    #[tokio::test]
    async fn page_detach_buffers_until_reattach() {
        let mut bridge = TestBridge::main().await;
        bridge.handle.detach();
        bridge.handle.send("executeCommand", "\"a\"");
        assert_quiet(&mut bridge.outbound).await;

        bridge.attach();
        assert_eq!(bridge.next().await, "inject::null");
        assert_eq!(bridge.next().await, "executeCommand::\"a\"");
    }

    #[tokio::test]
    async fn external_storage_write_notifies_page() {
        let mut bridge = TestBridge::main().await;
        bridge.fakes.storage.external_write("vault", "{}");
        assert_eq!(bridge.next().await, r#"storageChanged::{"key":"vault"}"#);
    }

    #[tokio::test]
    async fn message_binds_background_once_and_relays_reply() {
        let (binder, mut processes) = FakeBinder::new();
        let mut bridge = TestBridge::main_with_binder(binder.clone()).await;

        bridge.frame("message:1:\"a\"");
        bridge.frame("message:2:\"b\"");

        let mut process = processes.recv().await.unwrap();
        let mut handlers = Vec::new();
        for expected in ["\"a\"", "\"b\""] {
            match process.recv().await.unwrap() {
                BackgroundCommand::Message { payload, handler } => {
                    assert_eq!(payload, expected);
                    handlers.push(handler);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(binder.binds(), 1);

        let second = handlers.pop().unwrap();
        let first = handlers.pop().unwrap();
        second.on_error("\"nope\"".into());
        first.on_response("42".into());

        assert_eq!(bridge.next().await, "error:2:\"nope\"");
        assert_eq!(bridge.next().await, "response:1:42");
    }

    #[tokio::test]
    async fn background_death_fails_in_flight_requests_and_rebinds_lazily() {
        let (binder, mut processes) = FakeBinder::new();
        let mut bridge = TestBridge::main_with_binder(binder.clone()).await;

        bridge.frame("message:7:{}");
        let mut process = processes.recv().await.unwrap();
        let command = process.recv().await.unwrap();
        assert!(matches!(command, BackgroundCommand::Message { .. }));

        drop(command);
        drop(process);
        assert_eq!(
            bridge.next().await,
            "error:7:\"background process unavailable: stopped before replying\""
        );

        let status = bridge.handle.clone();
        wait_until(|| status.status().background == LinkPhase::Unbound).await;
        assert_eq!(binder.binds(), 1, "no automatic rebind");

        bridge.handle.host_command("sync");
        let mut process = processes.recv().await.unwrap();
        assert!(matches!(
            process.recv().await.unwrap(),
            BackgroundCommand::Command { command_id } if command_id == "sync"
        ));
        assert_eq!(binder.binds(), 2);
    }

    #[tokio::test]
    async fn failed_bind_retries_on_next_submit_and_drains_everything() {
        let (binder, mut processes) = FakeBinder::new();
        binder.fail_next();
        let bridge = TestBridge::main_with_binder(binder.clone()).await;

        bridge.handle.host_command("first");
        let handle = bridge.handle.clone();
        wait_until(|| {
            let status = handle.status();
            status.background == LinkPhase::Unbound && status.background_queued == 1
        })
        .await;
        assert_eq!(binder.binds(), 1);

        bridge.handle.host_command("second");
        let mut process = processes.recv().await.unwrap();
        for expected in ["first", "second"] {
            assert!(matches!(
                process.recv().await.unwrap(),
                BackgroundCommand::Command { command_id } if command_id == expected
            ));
        }
    }

    #[tokio::test]
    async fn background_bridge_posts_host_commands_to_its_own_page() {
        let mut bridge = TestBridge::background().await;
        bridge.handle.host_command("refresh");
        assert_eq!(bridge.next().await, "executeCommand::\"refresh\"");
    }

    #[tokio::test]
    async fn status_reflects_channel_and_refresh_block() {
        let mut bridge = TestBridge::main().await;
        bridge.frame("blockRefresh::true");
        bridge.frame("readStorage:1:{\"key\":\"x\"}");
        assert_eq!(next_wire(&mut bridge.outbound).await, "response:1:null");

        let handle = bridge.handle.clone();
        wait_until(|| handle.status().refresh_blocked).await;
        let status = handle.status();
        assert!(status.channel_ready);
        assert_eq!(status.role, BridgeRole::Main);

        bridge.frame("blockRefresh::false");
        wait_until(|| !handle.status().refresh_blocked).await;
    }

    #[tokio::test]
    async fn shutdown_fails_outstanding_host_requests() {
        let bridge = TestBridge::main().await;
        let handle = bridge.handle.clone();
        let request = tokio::spawn(async move { handle.request("message", "{}").await });
        tokio::task::yield_now().await;
        bridge.handle.shutdown();
        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionLost(_)));
    }
}
