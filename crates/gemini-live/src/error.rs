use gemini_live_types::ErrorEnvelope;
use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected yet")]
    NotConnected,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The service answered with a non-success status; the body is kept parsed.
    #[error("api error {status}: {}", .envelope.error.message)]
    Api { status: u16, envelope: ErrorEnvelope },
}

impl ClientError {
    pub(crate) fn api(status: u16, body: &str) -> Self {
        Self::Api {
            status,
            envelope: ErrorEnvelope::parse(status, body),
        }
    }

    /// Lifts a rejected websocket handshake into an `Api` error so callers
    /// classify it the same way as a REST failure.
    pub(crate) fn from_handshake(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => {
                let status = response.status().as_u16();
                let body = response
                    .body()
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                Self::api(status, &body)
            }
            other => Self::WebSocket(other),
        }
    }
}
