//! Lazy, rebindable link to the long-lived background process.
//!
//! [`BackgroundLink`] is the connection-manager state machine
//! (`Unbound → Binding → Bound → Unbound`). It never binds on its own: a
//! bind is requested only when an action is submitted while unbound, and
//! actions queued meanwhile run in submission order once the link is bound.

use std::collections::VecDeque;
use std::fmt;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::MessagePort;
use crate::correlator::ResponseHandler;
use crate::error::BridgeError;

/// Action to run against a bound handle
pub type DeferredAction<H> = Box<dyn FnOnce(&H) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPhase {
    Unbound,
    Binding,
    Bound,
}

enum LinkState<H> {
    Unbound,
    Binding,
    Bound(H),
}

/// What `submit` did with an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    RanNow,
    /// Queued; `bind_requested` is true when this submit started a bind.
    Queued { bind_requested: bool },
}

pub struct BackgroundLink<H> {
    state: LinkState<H>,
    deferred: VecDeque<DeferredAction<H>>,
}

impl<H> Default for BackgroundLink<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> BackgroundLink<H> {
    pub fn new() -> Self {
        Self {
            state: LinkState::Unbound,
            deferred: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> LinkPhase {
        match self.state {
            LinkState::Unbound => LinkPhase::Unbound,
            LinkState::Binding => LinkPhase::Binding,
            LinkState::Bound(_) => LinkPhase::Bound,
        }
    }

    pub fn handle(&self) -> Option<&H> {
        match &self.state {
            LinkState::Bound(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Run now when bound, otherwise queue. When the caller sees
    /// `bind_requested`, it must start a bind and report back through
    /// [`on_bound`](Self::on_bound) or [`on_bind_failed`](Self::on_bind_failed).
    pub fn submit(&mut self, action: DeferredAction<H>) -> Submitted {
        match &self.state {
            LinkState::Bound(handle) => {
                action(handle);
                Submitted::RanNow
            }
            LinkState::Binding => {
                self.deferred.push_back(action);
                Submitted::Queued {
                    bind_requested: false,
                }
            }
            LinkState::Unbound => {
                self.deferred.push_back(action);
                self.state = LinkState::Binding;
                Submitted::Queued {
                    bind_requested: true,
                }
            }
        }
    }

    /// Bind completed: drain queued actions in order. Returns how many ran.
    pub fn on_bound(&mut self, handle: H) -> usize {
        let mut drained = 0;
        while let Some(action) = self.deferred.pop_front() {
            action(&handle);
            drained += 1;
        }
        self.state = LinkState::Bound(handle);
        drained
    }

    /// Bind failed: back to unbound, queued actions wait for the next bind.
    pub fn on_bind_failed(&mut self) {
        if matches!(self.state, LinkState::Binding) {
            self.state = LinkState::Unbound;
        }
    }

    /// The process went away. Drops the handle; nothing is retried.
    pub fn on_disconnected(&mut self) -> Option<H> {
        match std::mem::replace(&mut self.state, LinkState::Unbound) {
            LinkState::Bound(handle) => Some(handle),
            LinkState::Binding => {
                // A stale disconnect while a new bind is in flight.
                self.state = LinkState::Binding;
                None
            }
            LinkState::Unbound => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle to the background process
// ---------------------------------------------------------------------------

/// Requests the foreground can make of the background process
pub enum BackgroundCommand {
    /// Hand the background page a direct port.
    Connect { port: MessagePort, payload: String },
    /// Ask the background page; `handler` receives its reply.
    Message {
        payload: String,
        handler: Box<dyn ResponseHandler>,
    },
    /// Host-initiated command for the background page.
    Command { command_id: String },
}

impl fmt::Debug for BackgroundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { port, payload } => f
                .debug_struct("Connect")
                .field("port", port)
                .field("payload_len", &payload.len())
                .finish(),
            Self::Message { payload, .. } => f
                .debug_struct("Message")
                .field("payload_len", &payload.len())
                .finish(),
            Self::Command { command_id } => f
                .debug_struct("Command")
                .field("command_id", command_id)
                .finish(),
        }
    }
}

/// Cheap, cloneable handle to a running background process
#[derive(Clone, Debug)]
pub struct BackgroundHandle {
    tx: mpsc::UnboundedSender<BackgroundCommand>,
}

impl BackgroundHandle {
    pub fn new(tx: mpsc::UnboundedSender<BackgroundCommand>) -> Self {
        Self { tx }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the background process has stopped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn connect(&self, port: MessagePort, payload: String) {
        self.dispatch(BackgroundCommand::Connect { port, payload });
    }

    pub fn message(&self, payload: String, handler: Box<dyn ResponseHandler>) {
        self.dispatch(BackgroundCommand::Message { payload, handler });
    }

    pub fn command(&self, command_id: String) {
        self.dispatch(BackgroundCommand::Command { command_id });
    }

    fn dispatch(&self, command: BackgroundCommand) {
        if let Err(err) = self.tx.send(command) {
            // Dropping the command drops any response handler with it, which
            // fails the caller's request.
            debug!(
                component = "background",
                event = "background.dispatch.closed",
                command = ?err.0,
                "Background process gone, command dropped"
            );
        }
    }
}

/// Starts (or finds) the background process.
pub trait BackgroundBinder: Send + Sync {
    fn bind(&self) -> BoxFuture<'static, Result<BackgroundHandle, BridgeError>>;
}
