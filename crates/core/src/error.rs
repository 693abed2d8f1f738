use std::time::Duration;

use companion_native_utils::audio::CodecError;
use gemini_live_types::ErrorEnvelope;

/// Failure taxonomy shared by every component of a live session.
///
/// Classification of raw API failures happens once, in [`classify_api_failure`]
/// and [`classify_close`]; everything downstream matches on these variants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LiveError {
    /// Microphone access was refused or no input device exists.
    #[error("microphone permission denied: {0}")]
    Permission(String),

    /// The live channel failed or closed abnormally.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("tool failed: {0}")]
    ToolFailure(String),

    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("no active session")]
    NotConnected,

    #[error("a session is already active")]
    AlreadyActive,
}

impl LiveError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LiveError::RateLimited { .. })
    }

    /// The server's suggested wait, when the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LiveError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<CodecError> for LiveError {
    fn from(err: CodecError) -> Self {
        LiveError::MalformedData(err.to_string())
    }
}

const CREDENTIAL_MARKERS: [&str; 3] = [
    "requested entity was not found",
    "api key not valid",
    "api_key_invalid",
];

fn mentions_bad_credential(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    CREDENTIAL_MARKERS.iter().any(|m| message.contains(m))
}

/// Maps a failed one-shot API request onto the taxonomy.
///
/// * 429 or `RESOURCE_EXHAUSTED` is rate limiting, with `RetryInfo.retryDelay` as the hint.
/// * 401, 403, `API_KEY_INVALID` and "Requested entity was not found" are credential failures.
/// * Everything else is a plain tool failure.
pub fn classify_api_failure(http_status: u16, envelope: &ErrorEnvelope) -> LiveError {
    let status = &envelope.error;
    let code = if status.code != 0 { status.code } else { http_status };
    let message = if status.message.is_empty() {
        format!("request failed with status {code}")
    } else {
        status.message.clone()
    };

    if code == 429 || http_status == 429 || status.status == "RESOURCE_EXHAUSTED" {
        return LiveError::RateLimited {
            message,
            retry_after: status.retry_delay(),
        };
    }

    if matches!(code, 401 | 403)
        || status.status == "UNAUTHENTICATED"
        || status.reason() == Some("API_KEY_INVALID")
        || mentions_bad_credential(&status.message)
    {
        return LiveError::InvalidCredential(message);
    }

    LiveError::ToolFailure(message)
}

/// Maps a live channel close onto the taxonomy. A normal closure yields `None`.
pub fn classify_close(code: Option<u16>, reason: &str) -> Option<LiveError> {
    if mentions_bad_credential(reason) {
        return Some(LiveError::InvalidCredential(reason.to_string()));
    }
    match code {
        None | Some(1000) => None,
        Some(code) if reason.is_empty() => {
            Some(LiveError::Transport(format!("channel closed with code {code}")))
        }
        Some(code) => Some(LiveError::Transport(format!("{reason} (code {code})"))),
    }
}
