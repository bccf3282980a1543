//! The long-lived background process
//!
//! A [`BackgroundHost`] is the background page's own bridge plus a pump that
//! turns [`BackgroundCommand`]s from foreground bridges into frames for that
//! page. [`BackgroundService`] starts one on demand and is the
//! [`BackgroundBinder`] handed to main bridges.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use hostbridge_protocol::{quote, FrameKind};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::background::{BackgroundBinder, BackgroundCommand, BackgroundHandle};
use crate::bridge::{BridgeConfig, BridgeHandle};
use crate::capabilities::Capabilities;
use crate::error::BridgeError;
use crate::ui_flow::UiFlowArbiter;

pub struct BackgroundHost {
    handle: BackgroundHandle,
    bridge: BridgeHandle,
    stop: Option<oneshot::Sender<()>>,
}

impl BackgroundHost {
    pub fn spawn(capabilities: Capabilities, arbiter: Arc<UiFlowArbiter>) -> Self {
        let bridge = BridgeHandle::spawn(BridgeConfig::background(capabilities, arbiter));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(pump(command_rx, bridge.clone(), stop_rx));

        Self {
            handle: BackgroundHandle::new(command_tx),
            bridge,
            stop: Some(stop_tx),
        }
    }

    pub fn handle(&self) -> &BackgroundHandle {
        &self.handle
    }

    /// The background page's bridge, for attaching its channel.
    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_closed() && !self.bridge.is_closed()
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for BackgroundHost {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn pump(
    mut command_rx: mpsc::UnboundedReceiver<BackgroundCommand>,
    bridge: BridgeHandle,
    mut stop_rx: oneshot::Receiver<()>,
) {
    info!(
        component = "background_host",
        event = "background.started",
        "Background process started"
    );
    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = bridge.closed() => break,
            command = command_rx.recv() => {
                let Some(command) = command else { break };
                debug!(
                    component = "background_host",
                    event = "background.command",
                    command = ?command,
                    "Forwarding to background page"
                );
                match command {
                    BackgroundCommand::Connect { port, payload } => {
                        bridge.send_with_port(FrameKind::Connect.as_str(), payload, port);
                    }
                    BackgroundCommand::Message { payload, handler } => {
                        bridge.request_with_handler(FrameKind::Message.as_str(), payload, handler);
                    }
                    BackgroundCommand::Command { command_id } => {
                        bridge.send(FrameKind::ExecuteCommand.as_str(), quote(&command_id));
                    }
                }
            }
        }
    }
    // Anything still queued is dropped along with its response handlers, and
    // the page bridge takes its own pending requests down with it.
    drop(command_rx);
    bridge.shutdown();
    info!(
        component = "background_host",
        event = "background.stopped",
        "Background process stopped"
    );
}

/// Starts the background process on first bind and hands out its handle.
pub struct BackgroundService {
    capabilities: Capabilities,
    arbiter: Arc<UiFlowArbiter>,
    current: Mutex<Option<BackgroundHost>>,
}

impl BackgroundService {
    pub fn new(capabilities: Capabilities, arbiter: Arc<UiFlowArbiter>) -> Self {
        Self {
            capabilities,
            arbiter,
            current: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<BackgroundHost>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the process if it is not running. Returns its handle and the
    /// page bridge.
    pub fn ensure_running(&self) -> (BackgroundHandle, BridgeHandle) {
        let mut slot = self.slot();
        if let Some(host) = slot.as_ref().filter(|host| host.is_running()) {
            return (host.handle().clone(), host.bridge().clone());
        }
        let host = BackgroundHost::spawn(self.capabilities.clone(), self.arbiter.clone());
        let running = (host.handle().clone(), host.bridge().clone());
        *slot = Some(host);
        running
    }

    /// The page bridge of the running process, if any.
    pub fn bridge(&self) -> Option<BridgeHandle> {
        self.slot()
            .as_ref()
            .filter(|host| host.is_running())
            .map(|host| host.bridge().clone())
    }

    pub fn is_running(&self) -> bool {
        self.slot().as_ref().is_some_and(BackgroundHost::is_running)
    }

    /// Stop the process. Foreground bridges see a disconnect and rebind on
    /// their next background action.
    pub fn stop(&self) -> bool {
        match self.slot().take() {
            Some(mut host) => {
                let was_running = host.is_running();
                host.stop();
                was_running
            }
            None => false,
        }
    }
}

impl BackgroundBinder for BackgroundService {
    fn bind(&self) -> BoxFuture<'static, Result<BackgroundHandle, BridgeError>> {
        let (handle, _) = self.ensure_running();
        Box::pin(async move { Ok(handle) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::LinkPhase;
    use crate::channel::{Inbound, MessagePort, Outbound};
    use crate::test_support::{next_outbound, next_wire, wait_until, Fakes, RecordingPresenter};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        service: Arc<BackgroundService>,
        main: BridgeHandle,
        main_page: UnboundedReceiver<Outbound>,
    }

    async fn harness() -> Harness {
        let fakes = Fakes::default();
        let arbiter = Arc::new(UiFlowArbiter::new(Arc::new(RecordingPresenter::default())));
        let service = Arc::new(BackgroundService::new(fakes.capabilities(), arbiter.clone()));
        let main = BridgeHandle::spawn(BridgeConfig::main(
            fakes.capabilities(),
            arbiter,
            service.clone(),
        ));
        let (tx, mut main_page) = mpsc::unbounded_channel();
        main.attach(Box::new(tx));
        assert_eq!(next_wire(&mut main_page).await, "inject::null");
        Harness {
            service,
            main,
            main_page,
        }
    }

    fn attach_background_page(
        service: &BackgroundService,
    ) -> (BridgeHandle, UnboundedReceiver<Outbound>) {
        let (_, bridge) = service.ensure_running();
        let (tx, rx) = mpsc::unbounded_channel();
        bridge.attach(Box::new(tx));
        (bridge, rx)
    }

    #[tokio::test]
    async fn message_round_trips_through_background_page() {
        let mut h = harness().await;
        let (background, mut background_page) = attach_background_page(&h.service);
        assert_eq!(next_wire(&mut background_page).await, "inject::null");

        h.main.inbound(Inbound::text("message:9:{\"q\":\"sync\"}"));
        assert_eq!(
            next_wire(&mut background_page).await,
            "message:1:{\"q\":\"sync\"}"
        );

        background.inbound(Inbound::text("response:1:\"done\""));
        assert_eq!(next_wire(&mut h.main_page).await, "response:9:\"done\"");
    }

    #[tokio::test]
    async fn message_before_background_page_attaches_is_buffered() {
        let mut h = harness().await;
        h.main.inbound(Inbound::text("message:1:\"early\""));

        // The bind happens on first use; give it a moment before attaching.
        wait_until(|| h.service.is_running()).await;
        let (_, mut background_page) = attach_background_page(&h.service);
        assert_eq!(next_wire(&mut background_page).await, "inject::null");
        assert_eq!(next_wire(&mut background_page).await, "message:1:\"early\"");
    }

    #[tokio::test]
    async fn connect_hands_port_to_background_page() {
        let h = harness().await;
        let (_, mut background_page) = attach_background_page(&h.service);
        assert_eq!(next_wire(&mut background_page).await, "inject::null");

        let (near, mut far) = MessagePort::pair();
        h.main.inbound(Inbound {
            wire: "connect::\"autofill\"".into(),
            port: Some(near),
        });

        let outbound = next_outbound(&mut background_page).await;
        assert_eq!(outbound.wire, "connect::\"autofill\"");
        let port = outbound.port.expect("port travels with connect");
        assert!(port.post("hi"));
        assert_eq!(far.recv().await.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn host_command_reaches_background_page() {
        let h = harness().await;
        let (_, mut background_page) = attach_background_page(&h.service);
        assert_eq!(next_wire(&mut background_page).await, "inject::null");

        h.main.host_command("lock");
        assert_eq!(
            next_wire(&mut background_page).await,
            "executeCommand::\"lock\""
        );
    }

    #[tokio::test]
    async fn stop_fails_in_flight_message_and_next_use_restarts() {
        let mut h = harness().await;
        let (_, mut background_page) = attach_background_page(&h.service);
        assert_eq!(next_wire(&mut background_page).await, "inject::null");

        h.main.inbound(Inbound::text("message:3:{}"));
        assert_eq!(next_wire(&mut background_page).await, "message:1:{}");

        assert!(h.service.stop());
        assert_eq!(
            next_wire(&mut h.main_page).await,
            "error:3:\"background process unavailable: stopped before replying\""
        );
        assert!(!h.service.is_running());

        let main = h.main.clone();
        wait_until(|| {
            main.status().background == LinkPhase::Unbound
        })
        .await;

        h.main.host_command("sync");
        wait_until(|| h.service.is_running()).await;
        let (_, mut restarted_page) = attach_background_page(&h.service);
        assert_eq!(next_wire(&mut restarted_page).await, "inject::null");
        assert_eq!(
            next_wire(&mut restarted_page).await,
            "executeCommand::\"sync\""
        );
    }
}
