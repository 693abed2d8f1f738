use gemini_live_types::generate::{GenerateContentRequest, GenerateContentResponse};
use secrecy::{ExposeSecret, SecretString};

use crate::client::config::Config;
use crate::client::consts::API_KEY_HEADER;
use crate::error::ClientError;

/// One-shot `generateContent` calls. No retrying happens here; callers wrap
/// calls in their own backoff.
pub struct GenerativeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl GenerativeClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.rest_base_url().to_string(),
            api_key: SecretString::from(config.api_key().expose_secret().to_string()),
        }
    }

    pub async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ClientError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            model.trim_start_matches("models/")
        );
        tracing::debug!("generateContent model={}", model);

        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("generateContent failed with status {}", status);
            return Err(ClientError::api(status.as_u16(), &body));
        }
        Ok(response.json::<GenerateContentResponse>().await?)
    }
}
