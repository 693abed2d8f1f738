//! The Google API error envelope:
//! `{"error": {"code": 429, "message": "..", "status": "RESOURCE_EXHAUSTED", "details": [..]}}`.
use std::time::Duration;

const RETRY_INFO_TYPE: &str = "type.googleapis.com/google.rpc.RetryInfo";
const ERROR_INFO_TYPE: &str = "type.googleapis.com/google.rpc.ErrorInfo";

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorStatus,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorStatus {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    #[serde(rename = "@type", default)]
    pub type_url: String,
    #[serde(default)]
    pub retry_delay: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ErrorEnvelope {
    /// Parses a response body; bodies that are not an envelope become a bare
    /// status carrying the raw text as its message.
    pub fn parse(http_status: u16, body: &str) -> Self {
        serde_json::from_str::<ErrorEnvelope>(body).unwrap_or_else(|_| ErrorEnvelope {
            error: ErrorStatus {
                code: http_status,
                message: body.trim().to_string(),
                ..Default::default()
            },
        })
    }
}

impl ErrorStatus {
    /// The server's suggested retry delay (`RetryInfo.retryDelay`, e.g. `"7s"` or `"1.5s"`).
    pub fn retry_delay(&self) -> Option<Duration> {
        self.details
            .iter()
            .filter(|d| d.type_url == RETRY_INFO_TYPE)
            .find_map(|d| d.retry_delay.as_deref())
            .and_then(parse_duration)
    }

    /// `ErrorInfo.reason`, e.g. `API_KEY_INVALID`.
    pub fn reason(&self) -> Option<&str> {
        self.details
            .iter()
            .filter(|d| d.type_url == ERROR_INFO_TYPE)
            .find_map(|d| d.reason.as_deref())
    }
}

/// Parses a protobuf JSON duration such as `"7s"` or `"0.250s"`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().strip_suffix('s')?.parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
