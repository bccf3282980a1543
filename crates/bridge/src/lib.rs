//! hostbridge core
//!
//! Everything between the page's message channel and the host capabilities:
//! the ordered channel with its outbound buffer, request correlation, the
//! capability router, the lazily bound background link, the single-slot UI
//! flow arbiter and the OAuth token state machine, all driven by one actor
//! per bridge.

pub mod background;
pub mod background_host;
pub mod bridge;
pub mod bridge_command;
pub mod capabilities;
pub mod channel;
pub mod correlator;
pub mod error;
pub mod oauth;
mod router;
pub mod ui_flow;

#[cfg(test)]
mod test_support;

pub use background::{BackgroundBinder, BackgroundCommand, BackgroundHandle, LinkPhase};
pub use background_host::{BackgroundHost, BackgroundService};
pub use bridge::{BridgeConfig, BridgeHandle, BridgeRole, BridgeStatus};
pub use bridge_command::BridgeCommand;
pub use capabilities::{
    Account, AccountTokenProvider, AppLauncher, Capabilities, CapabilityFuture, Clipboard,
    DocumentStore, KeyValueStore, SecureValueStore, TokenFetch, Unavailable,
};
pub use channel::{FrameSink, Inbound, MessagePort, Outbound};
pub use correlator::{ReplyResult, ResponseHandler};
pub use error::{BridgeError, CapabilityError};
pub use router::CLIPBOARD_LABEL;
pub use ui_flow::{FlowCallback, FlowPresenter, UiFlowArbiter};
