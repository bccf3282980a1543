//! hostbridge protocol
//!
//! Wire types shared by the bridge core, the server transport and host
//! surfaces: the `kind:requestId:payload` frame codec, frame kinds, JSON
//! payloads, and the surface flow protocol.

use uuid::Uuid;

pub mod flow;
pub mod frame;
pub mod kinds;
pub mod payloads;

pub use flow::{
    FlowLaunch, FlowRequest, FlowResult, FlowResultCode, RequestCode, SurfaceEvent, SurfaceReply,
};
pub use frame::{decode, encode, quote, to_payload, Frame, FrameError, NULL_PAYLOAD};
pub use kinds::FrameKind;
pub use payloads::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
