//! In-memory fakes for the capability traits, shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use hostbridge_protocol::{FlowLaunch, FlowResult, FlowResultCode, RequestCode};
use tokio::sync::{broadcast, mpsc};

use crate::background::{BackgroundBinder, BackgroundCommand, BackgroundHandle};
use crate::bridge::{BridgeConfig, BridgeHandle};
use crate::capabilities::{
    Account, AccountTokenProvider, AppLauncher, Capabilities, CapabilityFuture, Clipboard,
    DocumentStore, KeyValueStore, SecureValueStore, TokenFetch,
};
use crate::channel::{Inbound, Outbound};
use crate::error::{BridgeError, CapabilityError};
use crate::ui_flow::{FlowCallback, FlowPresenter, UiFlowArbiter};

pub fn code_name(code: RequestCode) -> String {
    serde_json::to_value(code)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct FlowLog(Arc<Mutex<Vec<String>>>);

impl FlowLog {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn callback(&self, name: &str) -> Box<dyn FlowCallback> {
        Box::new(LoggedCallback {
            name: name.to_string(),
            log: self.clone(),
        })
    }
}

struct LoggedCallback {
    name: String,
    log: FlowLog,
}

impl FlowCallback for LoggedCallback {
    fn on_result(self: Box<Self>, result: FlowResult) {
        let outcome = match result.result_code {
            FlowResultCode::Ok => "ok",
            FlowResultCode::Canceled => "canceled",
        };
        self.log.push(format!(
            "{} result {} {}",
            self.name,
            code_name(result.request_code),
            outcome
        ));
    }

    fn on_cancel(self: Box<Self>) {
        self.log.push(format!("{} cancel", self.name));
    }
}

/// Presenter that records launches instead of showing anything.
#[derive(Clone, Default)]
pub struct RecordingPresenter {
    log: FlowLog,
    launches: Arc<Mutex<Vec<FlowLaunch>>>,
}

impl RecordingPresenter {
    pub fn with_log(log: FlowLog) -> Self {
        Self {
            log,
            launches: Arc::default(),
        }
    }

    pub fn log(&self) -> FlowLog {
        self.log.clone()
    }

    pub fn launches(&self) -> Vec<FlowLaunch> {
        self.launches.lock().unwrap().clone()
    }
}

impl FlowPresenter for RecordingPresenter {
    fn present(&self, launch: FlowLaunch) {
        self.log
            .push(format!("present {}", code_name(launch.request_code)));
        self.launches.lock().unwrap().push(launch);
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            values: Mutex::default(),
            changes,
        }
    }
}

impl MemoryStore {
    /// Simulate a write from another process.
    pub fn external_write(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        let _ = self.changes.send(key.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CapabilityError> {
        Ok(self.value(key))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), CapabilityError> {
        self.external_write(key, value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CapabilityError> {
        self.values.lock().unwrap().remove(key);
        let _ = self.changes.send(key.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[derive(Default)]
pub struct RecordingClipboard {
    pub copied: Mutex<Vec<(String, String)>>,
    pub broken: AtomicBool,
}

impl Clipboard for RecordingClipboard {
    fn set_text(&self, label: &str, text: &str) -> CapabilityFuture<()> {
        if self.broken.load(Ordering::SeqCst) {
            return async { Err(CapabilityError::Failed("clipboard command exited with 1".into())) }
                .boxed();
        }
        self.copied
            .lock()
            .unwrap()
            .push((label.to_string(), text.to_string()));
        async { Ok(()) }.boxed()
    }
}

#[derive(Default)]
pub struct FakeSecureStore {
    pub value: Mutex<Option<Vec<u8>>>,
    pub deny_presence: AtomicBool,
}

impl SecureValueStore for FakeSecureStore {
    fn remember(&self, value: Vec<u8>) -> Result<(), CapabilityError> {
        *self.value.lock().unwrap() = Some(value);
        Ok(())
    }

    fn recall(&self) -> CapabilityFuture<Option<Vec<u8>>> {
        let outcome = if self.deny_presence.load(Ordering::SeqCst) {
            Err(CapabilityError::PresenceDenied)
        } else {
            Ok(self.value.lock().unwrap().clone())
        };
        async move { outcome }.boxed()
    }
}

/// Answers token fetches from a script, one entry per call.
#[derive(Default)]
pub struct ScriptedTokens {
    script: Mutex<VecDeque<Result<TokenFetch, CapabilityError>>>,
    pub calls: Mutex<Vec<(Account, String)>>,
}

impl ScriptedTokens {
    pub fn push(&self, outcome: Result<TokenFetch, CapabilityError>) {
        self.script.lock().unwrap().push_back(outcome);
    }
}

impl AccountTokenProvider for ScriptedTokens {
    fn fetch_token(&self, account: Account, scope: String) -> CapabilityFuture<TokenFetch> {
        self.calls.lock().unwrap().push((account, scope));
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CapabilityError::Failed("script exhausted".into())));
        async move { outcome }.boxed()
    }
}

#[derive(Default)]
pub struct RecordingDocuments {
    pub written: Mutex<Vec<(String, Vec<u8>)>>,
}

impl DocumentStore for RecordingDocuments {
    fn write(&self, location: String, bytes: Vec<u8>) -> CapabilityFuture<()> {
        self.written.lock().unwrap().push((location, bytes));
        async { Ok(()) }.boxed()
    }
}

#[derive(Default)]
pub struct CountingLauncher {
    pub opened: AtomicUsize,
}

impl AppLauncher for CountingLauncher {
    fn open_app(&self) -> Result<(), CapabilityError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Concrete handles on the fakes behind a [`Capabilities`] bundle
#[derive(Clone)]
pub struct Fakes {
    pub storage: Arc<MemoryStore>,
    pub clipboard: Arc<RecordingClipboard>,
    pub secure_store: Arc<FakeSecureStore>,
    pub tokens: Arc<ScriptedTokens>,
    pub documents: Arc<RecordingDocuments>,
    pub launcher: Arc<CountingLauncher>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            storage: Arc::default(),
            clipboard: Arc::default(),
            secure_store: Arc::default(),
            tokens: Arc::default(),
            documents: Arc::default(),
            launcher: Arc::default(),
        }
    }
}

impl Fakes {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            storage: self.storage.clone(),
            clipboard: self.clipboard.clone(),
            secure_store: self.secure_store.clone(),
            tokens: self.tokens.clone(),
            documents: self.documents.clone(),
            launcher: self.launcher.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Background
// ---------------------------------------------------------------------------

/// Binder whose "background process" is a receiver handed to the test.
pub struct FakeBinder {
    binds: AtomicUsize,
    fail_next: AtomicBool,
    processes: mpsc::UnboundedSender<mpsc::UnboundedReceiver<BackgroundCommand>>,
}

impl FakeBinder {
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<mpsc::UnboundedReceiver<BackgroundCommand>>,
    ) {
        let (processes, rx) = mpsc::unbounded_channel();
        let binder = Arc::new(Self {
            binds: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            processes,
        });
        (binder, rx)
    }

    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl BackgroundBinder for FakeBinder {
    fn bind(&self) -> BoxFuture<'static, Result<BackgroundHandle, BridgeError>> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return async { Err(BridgeError::ConnectionLost("bind refused".into())) }.boxed();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.processes.send(rx);
        async move { Ok(BackgroundHandle::new(tx)) }.boxed()
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// Next outbound wire frame, failing the test after a second.
pub async fn next_wire(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> String {
    next_outbound(rx).await.wire
}

pub async fn next_outbound(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Outbound {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for outbound frame")
        .expect("outbound sink closed")
}

/// Assert nothing else is sent within a short grace period.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Outbound>) {
    if let Ok(Some(message)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        panic!("unexpected outbound frame: {}", message.wire);
    }
}

/// Poll `condition` until it holds, failing the test after a second.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within a second"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ---------------------------------------------------------------------------
// Bridge harness
// ---------------------------------------------------------------------------

/// A spawned bridge wired to fakes, with the page side as a receiver.
pub struct TestBridge {
    pub handle: BridgeHandle,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub fakes: Fakes,
    pub presenter: RecordingPresenter,
    pub arbiter: Arc<UiFlowArbiter>,
}

impl TestBridge {
    fn build(config: impl FnOnce(Capabilities, Arc<UiFlowArbiter>) -> BridgeConfig) -> Self {
        let fakes = Fakes::default();
        let presenter = RecordingPresenter::default();
        let arbiter = Arc::new(UiFlowArbiter::new(Arc::new(presenter.clone())));
        let handle = BridgeHandle::spawn(config(fakes.capabilities(), arbiter.clone()));
        let (_, outbound) = mpsc::unbounded_channel();
        Self {
            handle,
            outbound,
            fakes,
            presenter,
            arbiter,
        }
    }

    /// Main bridge with no page attached yet.
    pub async fn detached_main() -> Self {
        let (binder, _processes) = FakeBinder::new();
        Self::build(|caps, arbiter| BridgeConfig::main(caps, arbiter, binder))
    }

    /// Main bridge with a page attached and the bootstrap frame consumed.
    pub async fn main() -> Self {
        let (binder, _processes) = FakeBinder::new();
        Self::main_with_binder(binder).await
    }

    pub async fn main_with_binder(binder: Arc<FakeBinder>) -> Self {
        let mut bridge = Self::build(|caps, arbiter| BridgeConfig::main(caps, arbiter, binder));
        bridge.attach();
        assert_eq!(bridge.next().await, "inject::null");
        bridge
    }

    pub async fn background() -> Self {
        let mut bridge = Self::build(BridgeConfig::background);
        bridge.attach();
        assert_eq!(bridge.next().await, "inject::null");
        bridge
    }

    /// Attach a fresh page sink, replacing `outbound`.
    pub fn attach(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handle.attach(Box::new(tx));
        self.outbound = rx;
    }

    /// Deliver a wire frame from the page.
    pub fn frame(&self, wire: &str) {
        self.handle.inbound(Inbound::text(wire));
    }

    pub async fn next(&mut self) -> String {
        next_wire(&mut self.outbound).await
    }

    /// Wait until `count` flows have been presented, returning the last.
    pub async fn launched(&self, count: usize) -> FlowLaunch {
        let presenter = self.presenter.clone();
        wait_until(|| presenter.launches().len() >= count).await;
        self.presenter
            .launches()
            .pop()
            .expect("a flow was presented")
    }
}
