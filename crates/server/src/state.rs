//! Shared server state handed to every route.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hostbridge_core::{
    BackgroundService, BridgeConfig, BridgeHandle, Capabilities, UiFlowArbiter,
};

use crate::ports::PortRegistry;
use crate::surface::SurfaceHub;

/// Which socket currently owns a bridge's channel.
///
/// A page reconnecting attaches a new sink before the old socket notices it
/// closed; only the current owner may detach.
#[derive(Default)]
pub struct SocketSlot(AtomicU64);

impl SocketSlot {
    pub fn claim(&self, connection_id: u64) {
        self.0.store(connection_id, Ordering::SeqCst);
    }

    /// Give up ownership. False when another socket took over meanwhile.
    pub fn release(&self, connection_id: u64) -> bool {
        self.0
            .compare_exchange(connection_id, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[derive(Clone)]
pub struct HostState {
    pub main: BridgeHandle,
    pub background: Arc<BackgroundService>,
    pub arbiter: Arc<UiFlowArbiter>,
    pub surfaces: Arc<SurfaceHub>,
    pub ports: Arc<PortRegistry>,
    pub main_socket: Arc<SocketSlot>,
    pub background_socket: Arc<SocketSlot>,
}

impl HostState {
    /// Spawn the main bridge and prepare the (lazily started) background
    /// process. Must be called inside the runtime.
    pub fn new(capabilities: Capabilities, surfaces: Arc<SurfaceHub>) -> Self {
        let arbiter = Arc::new(UiFlowArbiter::new(surfaces.clone()));
        let background = Arc::new(BackgroundService::new(
            capabilities.clone(),
            arbiter.clone(),
        ));
        let main = BridgeHandle::spawn(BridgeConfig::main(
            capabilities,
            arbiter.clone(),
            background.clone(),
        ));

        Self {
            main,
            background,
            arbiter,
            surfaces,
            ports: Arc::new(PortRegistry::new()),
            main_socket: Arc::new(SocketSlot::default()),
            background_socket: Arc::new(SocketSlot::default()),
        }
    }

    pub fn shutdown(&self) {
        self.main.shutdown();
        self.background.stop();
    }
}
