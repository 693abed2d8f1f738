use std::sync::Arc;

use async_trait::async_trait;
use gemini_live_types::{ClientMessage, ServerMessage, Setup};
use tokio::sync::mpsc;

use crate::error::LiveError;

/// What the duplex channel reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The server accepted the opening configuration.
    Opened,
    Message(ServerMessage),
    /// The channel failed; the session must be torn down.
    Failed(LiveError),
    /// The channel closed normally.
    Closed { reason: String },
}

/// Write half of an open channel.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    async fn send(&self, message: ClientMessage) -> Result<(), LiveError>;

    /// Closes the channel. Safe to call more than once.
    async fn close(&self);
}

pub struct Connection {
    pub channel: Arc<dyn LiveChannel>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Opens channels to the remote assistant.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: Setup) -> Result<Connection, LiveError>;
}
