//! Single-slot arbiter for host UI flows.
//!
//! One arbiter exists per process and is shared by every bridge in it. At
//! most one flow is pending: starting a new one cancels the previous one
//! before the new one is shown. Results that arrive with nothing pending are
//! ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hostbridge_protocol::{FlowLaunch, FlowRequest, FlowResult, RequestCode};
use tracing::{debug, info, warn};

/// Receives the outcome of a flow. Exactly one method is called.
pub trait FlowCallback: Send {
    fn on_result(self: Box<Self>, result: FlowResult);
    fn on_cancel(self: Box<Self>);
}

/// Shows flows on whatever surface can currently host UI.
pub trait FlowPresenter: Send + Sync {
    fn present(&self, launch: FlowLaunch);
}

struct ActiveFlow {
    request_code: RequestCode,
    callback: Box<dyn FlowCallback>,
}

pub struct UiFlowArbiter {
    active: Mutex<Option<ActiveFlow>>,
    presenter: Arc<dyn FlowPresenter>,
}

impl UiFlowArbiter {
    pub fn new(presenter: Arc<dyn FlowPresenter>) -> Self {
        Self {
            active: Mutex::new(None),
            presenter,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveFlow>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }

    /// Preempt any pending flow, install `callback`, then present `flow`.
    pub fn start(&self, flow: FlowRequest, callback: Box<dyn FlowCallback>) {
        let launch = FlowLaunch::from(flow);
        let previous = self.slot().replace(ActiveFlow {
            request_code: launch.request_code,
            callback,
        });

        if let Some(previous) = previous {
            info!(
                component = "ui_flow",
                event = "ui_flow.preempted",
                previous = ?previous.request_code,
                next = ?launch.request_code,
                "Cancelling pending flow for a new one"
            );
            previous.callback.on_cancel();
        }

        debug!(
            component = "ui_flow",
            event = "ui_flow.started",
            request_code = ?launch.request_code,
            "Presenting flow"
        );
        self.presenter.present(launch);
    }

    /// Deliver a surface's result to the pending flow. Returns false when
    /// nothing matching was pending.
    pub fn resolve(&self, result: FlowResult) -> bool {
        let active = {
            let mut slot = self.slot();
            match slot.as_ref() {
                Some(active) if active.request_code == result.request_code => slot.take(),
                Some(active) => {
                    warn!(
                        component = "ui_flow",
                        event = "ui_flow.resolve.mismatched",
                        pending = ?active.request_code,
                        received = ?result.request_code,
                        "Ignoring result for a flow that is no longer pending"
                    );
                    None
                }
                None => None,
            }
        };

        match active {
            Some(active) => {
                active.callback.on_result(result);
                true
            }
            None => {
                debug!(
                    component = "ui_flow",
                    event = "ui_flow.resolve.spurious",
                    request_code = ?result.request_code,
                    "No flow pending for result"
                );
                false
            }
        }
    }

    /// Cancel whatever is pending. Used when the last surface goes away.
    pub fn cancel_active(&self) -> bool {
        let active = self.slot().take();
        match active {
            Some(active) => {
                active.callback.on_cancel();
                true
            }
            None => false,
        }
    }
}
