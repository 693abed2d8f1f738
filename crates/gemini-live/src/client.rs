use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gemini_live_types::{ClientMessage, ServerMessage, Setup};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::client::stats::Stats;
use crate::error::ClientError;

pub(crate) mod config;
pub(crate) mod consts;
pub(crate) mod stats;
mod utils;

/// What the reader task publishes for each websocket frame worth reporting.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Message(ServerMessage),
    /// The server closed the socket; `code`/`reason` come from the close frame.
    Closed { code: Option<u16>, reason: String },
    /// Reading from the socket failed; the connection is gone.
    Failed(String),
}

pub type EventRx = tokio::sync::mpsc::Receiver<LiveEvent>;
type EventTx = tokio::sync::mpsc::Sender<LiveEvent>;

enum Outbound {
    Message(ClientMessage),
    Close,
}

type ClientTx = tokio::sync::mpsc::Sender<Outbound>;

// How long `close` lets the writer flush before giving up on the peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Cloneable handle onto the outbound queue. Sending through it never
/// borrows the `Client`, so a blocked send cannot hold up `close`.
#[derive(Clone)]
pub struct MessageSender {
    tx: ClientTx,
}

impl MessageSender {
    /// Queue a client message for the writer task. Fails with `NotConnected`
    /// once the writer is gone, including when it is stopped mid-send.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.tx
            .send(Outbound::Message(message))
            .await
            .map_err(|_| ClientError::NotConnected)
    }
}

// Holds the outbound queue, the two socket tasks and usage stats guarded by a Mutex.
pub struct Client {
    capacity: usize,
    config: config::Config,
    c_tx: Option<ClientTx>,
    stats: Arc<Mutex<Stats>>,
    send_handle: Option<JoinHandle<()>>,
    recv_handle: Option<JoinHandle<()>>,
}

impl Client {
    fn new(capacity: usize, config: config::Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            stats: Arc::new(Mutex::new(Stats::new())),
            send_handle: None,
            recv_handle: None,
        }
    }

    async fn connect(&mut self) -> Result<EventRx, ClientError> {
        if self.c_tx.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        let request = utils::build_request(&self.config)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(ClientError::from_handshake)?;
        tracing::info!("connected to live endpoint, model={}", self.config.model());

        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<Outbound>(self.capacity);
        let (s_tx, s_rx) = tokio::sync::mpsc::channel::<LiveEvent>(self.capacity);
        self.c_tx = Some(c_tx);

        // Writer: serializes queued messages onto the socket until closed.
        self.send_handle = Some(tokio::spawn(async move {
            while let Some(outbound) = c_rx.recv().await {
                match outbound {
                    Outbound::Message(message) => match serde_json::to_string(&message) {
                        Ok(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                tracing::error!("failed to send message: {}", e);
                            }
                        }
                        Err(e) => {
                            tracing::error!("failed to serialize message: {}", e);
                        }
                    },
                    Outbound::Close => {
                        if let Err(e) = write.send(Message::Close(None)).await {
                            tracing::debug!("failed to send close frame: {}", e);
                        }
                        break;
                    }
                }
            }
            let _ = write.close().await;
        }));

        let stats = self.stats.clone();
        self.recv_handle = Some(tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        publish(&s_tx, LiveEvent::Failed(e.to_string())).await;
                        return;
                    }
                    Ok(message) => message,
                };
                // The live endpoint delivers JSON in both text and binary frames.
                let text = match message {
                    Message::Text(text) => text,
                    Message::Binary(bin) => match String::from_utf8(bin) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("unexpected non-utf8 binary message: {}", e);
                            continue;
                        }
                    },
                    Message::Close(frame) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                            .unwrap_or((None, String::new()));
                        tracing::info!("connection closed: code={:?} reason={:?}", code, reason);
                        publish(&s_tx, LiveEvent::Closed { code, reason }).await;
                        return;
                    }
                    _ => continue,
                };

                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(event) => {
                        if let Some(usage) = &event.usage_metadata {
                            if let Ok(mut stats_guard) = stats.lock() {
                                stats_guard.update_usage(usage);
                            } else {
                                tracing::error!("failed to update stats");
                            }
                        }
                        tracing::debug!(
                            "received message: setup_complete={} content={} tool_call={}",
                            event.setup_complete.is_some(),
                            event.server_content.is_some(),
                            event.tool_call.is_some()
                        );
                        if !publish(&s_tx, LiveEvent::Message(event)).await {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to deserialize message: {}, text=> {:?}", e, text);
                    }
                }
            }
            publish(
                &s_tx,
                LiveEvent::Closed {
                    code: None,
                    reason: "stream ended".to_string(),
                },
            )
            .await;
        }));

        Ok(s_rx)
    }

    // Return a copy of the usage stats gathered so far.
    pub fn stats(&self) -> Stats {
        self.stats
            .lock()
            .map(|stats_guard| stats_guard.clone())
            .unwrap_or_default()
    }

    /// Queue a client message for the writer task.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        match self.sender() {
            Some(sender) => sender.send(message).await,
            None => Err(ClientError::NotConnected),
        }
    }

    pub fn sender(&self) -> Option<MessageSender> {
        self.c_tx.as_ref().map(|tx| MessageSender { tx: tx.clone() })
    }

    pub async fn setup(&self, setup: Setup) -> Result<(), ClientError> {
        self.send(ClientMessage::Setup(setup)).await
    }

    /// Sends a close frame and waits a bounded time for the writer to finish.
    /// A writer stuck on a peer that stopped reading is aborted. Safe to call
    /// twice.
    pub async fn close(&mut self) {
        let queued = match self.c_tx.take() {
            Some(tx) => tx.try_send(Outbound::Close).is_ok(),
            None => false,
        };
        if let Some(mut handle) = self.send_handle.take() {
            if !queued {
                tracing::debug!("outbound queue full, dropping the connection without a close frame");
                handle.abort();
            } else if tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("writer did not finish within {:?}, aborting", CLOSE_TIMEOUT);
                handle.abort();
            }
        }
        if let Some(handle) = self.recv_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(handle) = self.send_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.recv_handle.take() {
            handle.abort();
        }
    }
}

async fn publish(tx: &EventTx, event: LiveEvent) -> bool {
    if tx.send(event).await.is_err() {
        tracing::debug!("event receiver dropped");
        return false;
    }
    true
}

/// Connects with the given config; returns the client and its event stream.
pub async fn connect_with_config(
    capacity: usize,
    config: config::Config,
) -> Result<(Client, EventRx), ClientError> {
    let mut client = Client::new(capacity, config);
    let events = client.connect().await?;
    Ok((client, events))
}
