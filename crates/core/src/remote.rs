//! Collaborators that reach outside the session: the one-shot generation
//! backend behind the remote tools, and the user's location.
use async_trait::async_trait;
use gemini_live_types::generate::LatLng;

use crate::error::LiveError;
use crate::events::SearchLink;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    pub summary: String,
    pub links: Vec<SearchLink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeRequest {
    pub request: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCode {
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub mime_type: String,
    /// Base64 image bytes.
    pub data: String,
}

/// Single-shot calls made on behalf of remote tools. Each call is one attempt;
/// retrying is the dispatcher's job. Failures must already be classified.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteTools: Send + Sync {
    async fn web_search(&self, query: &str) -> Result<SearchSummary, LiveError>;

    async fn map_search(
        &self,
        query: &str,
        location: Option<LatLng>,
    ) -> Result<SearchSummary, LiveError>;

    async fn generate_code(&self, request: &CodeRequest) -> Result<GeneratedCode, LiveError>;

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, LiveError>;

    /// Resolves a query to a single video identifier token.
    async fn find_media(&self, query: &str) -> Result<String, LiveError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn locate(&self) -> Result<LatLng, LiveError>;
}
