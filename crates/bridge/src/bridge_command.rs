//! Commands processed by the bridge actor
//!
//! External callers and the bridge's own spawned tasks talk to the actor
//! exclusively through these; nothing touches bridge state from outside.

use std::fmt;

use hostbridge_protocol::FlowResult;

use crate::background::BackgroundHandle;
use crate::channel::{FrameSink, Inbound, MessagePort};
use crate::correlator::{ReplyResult, ResponseHandler};
use crate::error::{BridgeError, CapabilityError};
use crate::oauth::OauthInput;

/// Which in-flight operation a finished UI flow belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTarget {
    Oauth(u64),
    Download(u64),
}

pub enum BridgeCommand {
    // -- Channel --
    Attach {
        sink: Box<dyn FrameSink>,
    },
    Detach,
    Inbound(Inbound),

    // -- Host-initiated frames --
    Send {
        kind: String,
        payload: String,
        port: Option<MessagePort>,
    },
    Request {
        kind: String,
        payload: String,
        handler: Box<dyn ResponseHandler>,
    },
    HostCommand {
        command_id: String,
    },

    // -- Completions marshalled back from spawned work --
    Complete {
        request_id: String,
        outcome: Result<String, BridgeError>,
    },
    Relay {
        request_id: String,
        reply: ReplyResult,
    },
    Unlocked {
        request_id: String,
        outcome: Result<Option<Vec<u8>>, CapabilityError>,
    },
    FlowFinished {
        target: FlowTarget,
        /// `None` when the flow was preempted.
        result: Option<FlowResult>,
    },
    Oauth {
        session_id: u64,
        input: OauthInput,
    },

    // -- Background link --
    BackgroundBound {
        generation: u64,
        handle: BackgroundHandle,
    },
    BackgroundBindFailed {
        generation: u64,
        error: BridgeError,
    },
    BackgroundDisconnected {
        generation: u64,
    },

    // -- Notifications --
    StorageChanged {
        key: String,
    },

    Shutdown,
}

impl BridgeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Attach { .. } => "attach",
            Self::Detach => "detach",
            Self::Inbound(_) => "inbound",
            Self::Send { .. } => "send",
            Self::Request { .. } => "request",
            Self::HostCommand { .. } => "host_command",
            Self::Complete { .. } => "complete",
            Self::Relay { .. } => "relay",
            Self::Unlocked { .. } => "unlocked",
            Self::FlowFinished { .. } => "flow_finished",
            Self::Oauth { .. } => "oauth",
            Self::BackgroundBound { .. } => "background_bound",
            Self::BackgroundBindFailed { .. } => "background_bind_failed",
            Self::BackgroundDisconnected { .. } => "background_disconnected",
            Self::StorageChanged { .. } => "storage_changed",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Debug for BridgeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
