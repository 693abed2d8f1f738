use std::sync::Arc;

use async_trait::async_trait;
use companion_core::channel::{ChannelEvent, Connection, LiveChannel, LiveConnector};
use companion_core::error::{LiveError, classify_api_failure, classify_close};
use gemini_live::{Client, ClientError, EventRx, LiveEvent, MessageSender};
use gemini_live_types::{ClientMessage, Setup};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, mpsc};

const EVENT_CAPACITY: usize = 1024;

/// Opens live channels on the Gemini Live websocket endpoint.
pub struct GeminiConnector {
    api_key: SecretString,
    base_url: Option<String>,
}

impl GeminiConnector {
    pub fn new(api_key: &SecretString) -> Self {
        Self {
            api_key: SecretString::from(api_key.expose_secret().to_string()),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    fn live_config(&self, model: &str) -> gemini_live::Config {
        let mut builder = gemini_live::Config::builder()
            .with_api_key(self.api_key.expose_secret())
            .with_model(model);
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url);
        }
        builder.build()
    }
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn connect(&self, setup: Setup) -> Result<Connection, LiveError> {
        let config = self.live_config(&setup.model);
        let (client, live_rx) = gemini_live::connect_with_config(EVENT_CAPACITY, config)
            .await
            .map_err(channel_error)?;
        client.setup(setup).await.map_err(channel_error)?;

        let (tx, events) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(forward_events(live_rx, tx));

        Ok(Connection {
            channel: Arc::new(GeminiChannel::new(client)),
            events,
        })
    }
}

/// Write half of a Gemini live connection. Sends go through a cloned
/// sender, so `close` never waits behind a send stuck on a full queue.
pub struct GeminiChannel {
    sender: std::sync::Mutex<Option<MessageSender>>,
    client: Mutex<Option<Client>>,
}

impl GeminiChannel {
    fn new(client: Client) -> Self {
        Self {
            sender: std::sync::Mutex::new(client.sender()),
            client: Mutex::new(Some(client)),
        }
    }

    fn sender(&self) -> Option<MessageSender> {
        self.sender.lock().ok().and_then(|sender| sender.clone())
    }
}

#[async_trait]
impl LiveChannel for GeminiChannel {
    async fn send(&self, message: ClientMessage) -> Result<(), LiveError> {
        match self.sender() {
            Some(sender) => sender.send(message).await.map_err(channel_error),
            None => Err(LiveError::NotConnected),
        }
    }

    async fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let client = self.client.lock().await.take();
        if let Some(mut client) = client {
            client.close().await;
            let stats = client.stats();
            tracing::info!(
                "Live session usage: {} tokens ({} prompt, {} response)",
                stats.total_tokens(),
                stats.prompt_tokens(),
                stats.response_tokens()
            );
        }
    }
}

async fn forward_events(mut live_rx: EventRx, tx: mpsc::Sender<ChannelEvent>) {
    while let Some(event) = live_rx.recv().await {
        let last = !matches!(event, LiveEvent::Message(_));
        if tx.send(translate(event)).await.is_err() {
            tracing::debug!("Session stopped listening to the live channel");
            return;
        }
        if last {
            return;
        }
    }
    let _ = tx
        .send(ChannelEvent::Closed {
            reason: "event stream ended".to_string(),
        })
        .await;
}

/// Maps a transport event onto what the session understands.
pub fn translate(event: LiveEvent) -> ChannelEvent {
    match event {
        LiveEvent::Message(message) => ChannelEvent::Message(message),
        LiveEvent::Closed { code, reason } => match classify_close(code, &reason) {
            Some(error) => ChannelEvent::Failed(error),
            None => ChannelEvent::Closed { reason },
        },
        LiveEvent::Failed(message) => ChannelEvent::Failed(LiveError::Transport(message)),
    }
}

/// Classifies a transport failure. Rejections that are not about credentials
/// or quota are transport errors on this path.
pub fn channel_error(err: ClientError) -> LiveError {
    match err {
        ClientError::Api { status, envelope } => match classify_api_failure(status, &envelope) {
            LiveError::ToolFailure(message) => LiveError::Transport(message),
            other => other,
        },
        ClientError::NotConnected => LiveError::NotConnected,
        other => LiveError::Transport(other.to_string()),
    }
}
