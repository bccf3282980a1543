//! The bridge channel and auxiliary message ports
//!
//! A [`Channel`] wraps whatever sink currently reaches the page. Until a sink
//! is attached (or after one fails) outbound messages are buffered and later
//! flushed in their original order.

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

/// One end of a duplex text pipe handed across the bridge alongside a frame.
///
/// Both ends of a pair share the same id.
pub struct MessagePort {
    id: String,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MessagePort {
    pub fn pair() -> (MessagePort, MessagePort) {
        let id = hostbridge_protocol::new_id();
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MessagePort {
                id: id.clone(),
                tx: a_tx,
                rx: a_rx,
            },
            MessagePort {
                id,
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Post to the other end. Returns false once the other end is gone.
    pub fn post(&self, text: impl Into<String>) -> bool {
        self.tx.send(text.into()).is_ok()
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Split into independently owned send and receive halves.
    pub fn split(self) -> (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        (self.tx, self.rx)
    }
}

impl fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePort").field("id", &self.id).finish()
    }
}

/// A wire frame leaving the bridge, with an optional attached port
#[derive(Debug)]
pub struct Outbound {
    pub wire: String,
    pub port: Option<MessagePort>,
}

impl Outbound {
    pub fn text(wire: String) -> Self {
        Self { wire, port: None }
    }
}

/// A wire frame arriving from the page, with an optional attached port
#[derive(Debug)]
pub struct Inbound {
    pub wire: String,
    pub port: Option<MessagePort>,
}

impl Inbound {
    pub fn text(wire: impl Into<String>) -> Self {
        Self {
            wire: wire.into(),
            port: None,
        }
    }
}

/// Something that can deliver outbound messages to the page.
///
/// On failure the message is handed back so it can be buffered again.
pub trait FrameSink: Send {
    fn post(&mut self, message: Outbound) -> Result<(), Outbound>;
}

impl FrameSink for mpsc::UnboundedSender<Outbound> {
    fn post(&mut self, message: Outbound) -> Result<(), Outbound> {
        self.send(message).map_err(|err| err.0)
    }
}

/// Send-ready flag plus ordered outbound buffer
#[derive(Default)]
pub struct Channel {
    sink: Option<Box<dyn FrameSink>>,
    buffer: VecDeque<Outbound>,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.sink.is_some()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Attach a sink, post `bootstrap` first, then flush the buffer.
    /// Returns how many buffered messages were delivered.
    pub fn attach(&mut self, mut sink: Box<dyn FrameSink>, bootstrap: Option<Outbound>) -> usize {
        if let Some(message) = bootstrap {
            if sink.post(message).is_err() {
                debug!(
                    component = "channel",
                    event = "channel.attach.bootstrap_failed",
                    "Sink closed before bootstrap frame was delivered"
                );
                return 0;
            }
        }
        self.sink = Some(sink);
        self.flush()
    }

    pub fn detach(&mut self) {
        self.sink = None;
    }

    /// Deliver now if ready and nothing is queued ahead, otherwise buffer.
    pub fn post(&mut self, message: Outbound) {
        self.buffer.push_back(message);
        if self.sink.is_some() {
            self.flush();
        }
    }

    fn flush(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(message) = self.buffer.pop_front() {
            let Some(sink) = self.sink.as_mut() else {
                self.buffer.push_front(message);
                break;
            };
            match sink.post(message) {
                Ok(()) => delivered += 1,
                Err(message) => {
                    debug!(
                        component = "channel",
                        event = "channel.sink_closed",
                        buffered = self.buffer.len() + 1,
                        "Sink closed, buffering until the page reattaches"
                    );
                    self.buffer.push_front(message);
                    self.sink = None;
                    break;
                }
            }
        }
        delivered
    }
}
