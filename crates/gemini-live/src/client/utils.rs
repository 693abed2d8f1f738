use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::client::config::Config;
use crate::client::consts::LIVE_PATH;

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    format!(
        "{}{}?key={}",
        config.base_url(),
        LIVE_PATH,
        config.api_key().expose_secret()
    )
    .into_client_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_targets_bidi_endpoint() {
        let config = Config::builder()
            .with_base_url("wss://example.test/")
            .with_api_key("k-123")
            .build();
        let request = build_request(&config).unwrap();
        let uri = request.uri().to_string();
        assert!(uri.starts_with("wss://example.test/ws/google.ai.generativelanguage"));
        assert!(uri.ends_with("BidiGenerateContent?key=k-123"));
    }
}
