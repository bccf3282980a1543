//! Host UI surfaces
//!
//! Surfaces are processes able to show UI (account chooser, consent screen,
//! save dialog). They connect on `/ws/surface`, receive [`SurfaceEvent`]s and
//! answer with [`SurfaceReply`]s. The hub remembers the launch that is still
//! pending so a surface connecting late (for example one started by the
//! surface command) picks it up.

use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hostbridge_core::{AppLauncher, CapabilityError, FlowPresenter};
use hostbridge_protocol::{FlowLaunch, RequestCode, SurfaceEvent};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 16;

pub struct SurfaceHub {
    events: broadcast::Sender<SurfaceEvent>,
    pending: Mutex<Option<FlowLaunch>>,
    command: Option<String>,
}

impl SurfaceHub {
    pub fn new(command: Option<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            events,
            pending: Mutex::new(None),
            command,
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<FlowLaunch>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a surface. Returns the launch it should show right away, if
    /// one is pending, and the stream of later events.
    pub fn subscribe(&self) -> (Option<FlowLaunch>, broadcast::Receiver<SurfaceEvent>) {
        let pending = self.pending();
        (pending.clone(), self.events.subscribe())
    }

    pub fn connected(&self) -> usize {
        self.events.receiver_count()
    }

    /// Forget the pending launch once its result has been delivered.
    pub fn finished(&self, request_code: RequestCode) {
        let mut pending = self.pending();
        if pending
            .as_ref()
            .is_some_and(|launch| launch.request_code == request_code)
        {
            *pending = None;
        }
    }

    /// Called after a surface's receiver is dropped. When that was the last
    /// surface, the launch it was showing is abandoned and returned.
    pub fn disconnected(&self) -> Option<FlowLaunch> {
        let mut pending = self.pending();
        if self.events.receiver_count() > 0 {
            return None;
        }
        pending.take()
    }

    /// Broadcast to connected surfaces, or run the surface command when none
    /// is connected. Returns false when the event reached nobody.
    fn publish(&self, event: SurfaceEvent, reason: &'static str) -> bool {
        if self.events.send(event).is_ok() {
            return true;
        }
        match self.command.as_deref() {
            Some(command) => self.launch_surface(command, reason),
            None => {
                debug!(
                    component = "surface",
                    event = "surface.none_connected",
                    reason = reason,
                    "No surface connected and no surface command configured"
                );
                false
            }
        }
    }

    fn launch_surface(&self, command: &str, reason: &'static str) -> bool {
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("HOSTBRIDGE_SURFACE_REASON", reason)
            .stdin(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                info!(
                    component = "surface",
                    event = "surface.command_started",
                    reason = reason,
                    "Started surface command"
                );
                tokio::spawn(async move {
                    if let Err(err) = child.wait().await {
                        warn!(
                            component = "surface",
                            event = "surface.command_wait_failed",
                            error = %err,
                            "Surface command did not exit cleanly"
                        );
                    }
                });
                true
            }
            Err(err) => {
                warn!(
                    component = "surface",
                    event = "surface.command_failed",
                    error = %err,
                    "Failed to start surface command"
                );
                false
            }
        }
    }
}

impl FlowPresenter for SurfaceHub {
    fn present(&self, launch: FlowLaunch) {
        // Held across the send so a subscriber sees either the replay or the
        // broadcast, never neither.
        let mut pending = self.pending();
        *pending = Some(launch.clone());
        self.publish(SurfaceEvent::FlowLaunch { launch }, "flow");
    }
}

impl AppLauncher for SurfaceHub {
    fn open_app(&self) -> Result<(), CapabilityError> {
        if self.publish(SurfaceEvent::OpenApp, "open_app") {
            Ok(())
        } else {
            Err(CapabilityError::Failed("no surface available to open the app".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_protocol::FlowRequest;

    fn chooser() -> FlowLaunch {
        FlowLaunch::from(FlowRequest::ChooseAccount {
            account_types: vec!["com.example".into()],
        })
    }

    #[tokio::test]
    async fn connected_surface_receives_launch() {
        let hub = SurfaceHub::new(None);
        let (replay, mut events) = hub.subscribe();
        assert!(replay.is_none());

        hub.present(chooser());
        assert_eq!(
            events.recv().await.unwrap(),
            SurfaceEvent::FlowLaunch { launch: chooser() }
        );
    }

    #[tokio::test]
    async fn late_surface_gets_pending_launch_until_finished() {
        let hub = SurfaceHub::new(None);
        hub.present(chooser());

        let (replay, _events) = hub.subscribe();
        assert_eq!(replay, Some(chooser()));

        hub.finished(RequestCode::AuthCode);
        assert!(hub.subscribe().0.is_some());
        hub.finished(RequestCode::ChooseAccount);
        assert!(hub.subscribe().0.is_none());
    }

    #[tokio::test]
    async fn last_surface_leaving_abandons_launch() {
        let hub = SurfaceHub::new(None);
        let (_, first) = hub.subscribe();
        let (_, second) = hub.subscribe();
        hub.present(chooser());

        drop(first);
        assert_eq!(hub.disconnected(), None);
        drop(second);
        assert_eq!(hub.disconnected(), Some(chooser()));
        assert!(hub.subscribe().0.is_none());
    }

    #[tokio::test]
    async fn open_app_without_any_surface_fails() {
        let hub = SurfaceHub::new(None);
        assert!(hub.open_app().is_err());

        let (_, mut events) = hub.subscribe();
        hub.open_app().unwrap();
        assert_eq!(events.recv().await.unwrap(), SurfaceEvent::OpenApp);
    }

    #[tokio::test]
    async fn surface_command_runs_when_nobody_is_connected() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("launched");
        let hub = SurfaceHub::new(Some(format!(
            "printf %s \"$HOSTBRIDGE_SURFACE_REASON\" > '{}'",
            marker.display()
        )));

        hub.open_app().unwrap();
        for _ in 0..200 {
            if std::fs::read_to_string(&marker).ok().as_deref() == Some("open_app") {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("surface command never ran");
    }
}
