//! Auxiliary ports waiting for their far end to connect.
//!
//! When a frame carrying a port crosses a page socket, the page only sees the
//! port id in the `#port` header. The port end it should talk to is parked
//! here until the page opens `/ws/port/{id}`, or dropped once the page socket
//! that parked it closes.

use dashmap::DashMap;
use hostbridge_core::MessagePort;
use tracing::debug;

const PORT_HEADER: &str = "#port ";

struct Parked {
    /// Page connection the port crossed.
    owner: u64,
    port: MessagePort,
}

#[derive(Default)]
pub struct PortRegistry {
    waiting: DashMap<String, Parked>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park(&self, owner: u64, id: impl Into<String>, port: MessagePort) {
        let id = id.into();
        debug!(
            component = "ports",
            event = "ports.parked",
            port_id = %id,
            owner,
            waiting = self.waiting.len() + 1,
            "Port waiting for its socket"
        );
        if self.waiting.insert(id.clone(), Parked { owner, port }).is_some() {
            debug!(
                component = "ports",
                event = "ports.replaced",
                port_id = %id,
                "Replaced an unclaimed port with the same id"
            );
        }
    }

    pub fn claim(&self, id: &str) -> Option<MessagePort> {
        self.waiting.remove(id).map(|(_, parked)| parked.port)
    }

    /// Drop every port still waiting on behalf of a closed page socket.
    pub fn release_owner(&self, owner: u64) -> usize {
        let before = self.waiting.len();
        self.waiting.retain(|_, parked| parked.owner != owner);
        let dropped = before.saturating_sub(self.waiting.len());
        if dropped > 0 {
            debug!(
                component = "ports",
                event = "ports.released",
                owner,
                dropped,
                "Dropped unclaimed ports of a closed page"
            );
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }
}

/// Split a socket message into its port id (if any) and the wire frame.
pub fn split_port_header(text: &str) -> (Option<&str>, &str) {
    match text.strip_prefix(PORT_HEADER) {
        Some(rest) => match rest.split_once('\n') {
            Some((id, wire)) if !id.is_empty() => (Some(id), wire),
            _ => (None, text),
        },
        None => (None, text),
    }
}

pub fn with_port_header(port_id: &str, wire: &str) -> String {
    format!("{PORT_HEADER}{port_id}\n{wire}")
}
