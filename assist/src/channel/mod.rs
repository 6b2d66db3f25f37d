//! The local side's view of the message channel.
//!
//! A [`ChannelEndpoint`] pairs a never-failing outgoing [`ChannelSender`] with
//! the stream of raw incoming JSON values. Transports (`memory`, `stdio`)
//! produce endpoints; nothing here listens on ambient process-wide state.

pub mod memory;
pub mod stdio;

use assist_core::AssistResult;
use assist_ipc::ChannelMessage;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Outgoing half of a channel. Sending never fails: when the channel is
/// unavailable the message is logged and dropped.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    label: Arc<str>,
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelSender {
    pub fn new(label: impl Into<Arc<str>>, tx: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            label: label.into(),
            tx,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns whether the message was handed to the transport.
    pub fn send(&self, message: &ChannelMessage) -> bool {
        match message.to_value() {
            Ok(value) => self.send_value(value),
            Err(e) => {
                error!("Channel({}): Failed to serialize message: {}", self.label, e);
                false
            }
        }
    }

    /// Forwards an already-encoded value untouched.
    pub fn send_value(&self, value: Value) -> bool {
        if self.tx.send(value).is_err() {
            warn!("Channel({}): Channel unavailable, message dropped", self.label);
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One end of a bidirectional, order-preserving message channel.
#[derive(Debug)]
pub struct ChannelEndpoint {
    sender: ChannelSender,
    incoming: mpsc::UnboundedReceiver<Value>,
}

impl ChannelEndpoint {
    pub fn new(
        label: impl Into<Arc<str>>,
        tx: mpsc::UnboundedSender<Value>,
        incoming: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        Self {
            sender: ChannelSender::new(label, tx),
            incoming,
        }
    }

    pub fn sender(&self) -> &ChannelSender {
        &self.sender
    }

    pub fn send(&self, message: &ChannelMessage) -> bool {
        self.sender.send(message)
    }

    /// Next raw incoming value; `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.incoming.recv().await
    }

    pub fn into_parts(self) -> (ChannelSender, mpsc::UnboundedReceiver<Value>) {
        (self.sender, self.incoming)
    }
}

/// Signals deliverable to a remote process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    Interrupt,
    #[default]
    Terminate,
    Kill,
}

impl std::str::FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().trim_start_matches("SIG") {
            "INT" | "INTERRUPT" => Ok(Signal::Interrupt),
            "TERM" | "TERMINATE" => Ok(Signal::Terminate),
            "KILL" => Ok(Signal::Kill),
            other => Err(format!("unsupported signal: {}", other)),
        }
    }
}

/// Control over the process on the far side of a channel.
#[async_trait]
pub trait ProcessControl: Send + Sync + Debug {
    async fn terminate(&self, signal: Signal) -> AssistResult<()>;

    fn pid(&self) -> Option<u32>;
}
