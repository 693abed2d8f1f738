use async_trait::async_trait;
use companion_core::error::{LiveError, classify_api_failure};
use companion_core::events::SearchLink;
use companion_core::remote::{
    CodeRequest, GeneratedCode, GeneratedImage, RemoteTools, SearchSummary,
};
use gemini_live::{ClientError, GenerativeClient};
use gemini_live_types::generate::{GenerateContentRequest, GenerateContentResponse, GroundingTool, LatLng};

const DEFAULT_CODE_LANGUAGE: &str = "python";

const CODE_INSTRUCTION: &str = "You write small, correct, self-contained programs. \
Reply with the code only: no explanations and no markdown fences.";

const MEDIA_INSTRUCTION: &str = "You find YouTube videos. Reply with the 11 character \
video id of the single best match and nothing else.";

/// Remote tool backend on top of one-shot `generateContent` calls.
pub struct GeminiTools {
    client: GenerativeClient,
    tool_model: String,
    image_model: String,
}

impl GeminiTools {
    pub fn new(config: &gemini_live::Config, tool_model: &str, image_model: &str) -> Self {
        Self {
            client: GenerativeClient::new(config),
            tool_model: tool_model.to_string(),
            image_model: image_model.to_string(),
        }
    }

    async fn generate(
        &self,
        model: &str,
        request: GenerateContentRequest,
    ) -> Result<GenerateContentResponse, LiveError> {
        self.client
            .generate_content(model, &request)
            .await
            .map_err(remote_error)
    }
}

#[async_trait]
impl RemoteTools for GeminiTools {
    async fn web_search(&self, query: &str) -> Result<SearchSummary, LiveError> {
        let request =
            GenerateContentRequest::prompt(query).with_tool(GroundingTool::GoogleSearch {});
        let response = self.generate(&self.tool_model, request).await?;
        search_summary(&response)
    }

    async fn map_search(
        &self,
        query: &str,
        location: Option<LatLng>,
    ) -> Result<SearchSummary, LiveError> {
        let mut request =
            GenerateContentRequest::prompt(query).with_tool(GroundingTool::GoogleMaps {});
        if let Some(at) = location {
            request = request.with_location(at.latitude, at.longitude);
        }
        let response = self.generate(&self.tool_model, request).await?;
        search_summary(&response)
    }

    async fn generate_code(&self, request: &CodeRequest) -> Result<GeneratedCode, LiveError> {
        let language = request
            .language
            .clone()
            .unwrap_or_else(|| DEFAULT_CODE_LANGUAGE.to_string());
        let prompt = format!("Write {language} code for this request:\n{}", request.request);
        let request =
            GenerateContentRequest::prompt(prompt).with_system_instruction(CODE_INSTRUCTION);
        let response = self.generate(&self.tool_model, request).await?;
        let text = response
            .text()
            .ok_or_else(|| LiveError::ToolFailure("no code in the response".to_string()))?;
        Ok(GeneratedCode {
            language,
            code: strip_fences(&text),
        })
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, LiveError> {
        let request =
            GenerateContentRequest::prompt(prompt).with_response_modalities(&["TEXT", "IMAGE"]);
        let response = self.generate(&self.image_model, request).await?;
        let blob = response
            .first_inline_data()
            .ok_or_else(|| LiveError::ToolFailure("no image in the response".to_string()))?;
        Ok(GeneratedImage {
            mime_type: blob.mime_type.clone(),
            data: blob.data.clone(),
        })
    }

    async fn find_media(&self, query: &str) -> Result<String, LiveError> {
        let request = GenerateContentRequest::prompt(query)
            .with_tool(GroundingTool::GoogleSearch {})
            .with_system_instruction(MEDIA_INSTRUCTION);
        let response = self.generate(&self.tool_model, request).await?;
        response
            .text()
            .map(|text| media_token(&text))
            .ok_or_else(|| LiveError::ToolFailure("no video in the response".to_string()))
    }
}

fn remote_error(err: ClientError) -> LiveError {
    match err {
        ClientError::Api { status, envelope } => classify_api_failure(status, &envelope),
        other => LiveError::ToolFailure(other.to_string()),
    }
}

fn search_summary(response: &GenerateContentResponse) -> Result<SearchSummary, LiveError> {
    let summary = response
        .text()
        .ok_or_else(|| LiveError::ToolFailure("empty search response".to_string()))?;
    let links = response
        .grounding_sources()
        .into_iter()
        .filter(|source| !source.uri.is_empty())
        .map(|source| SearchLink {
            uri: source.uri,
            title: source.title,
        })
        .collect();
    Ok(SearchSummary { summary, links })
}

fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag line.
    let body = body.split_once('\n').map_or("", |(_, rest)| rest);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim_end()
        .to_string()
}

// The model sometimes wraps the id in quotes or a full watch URL.
fn media_token(text: &str) -> String {
    let text = text.trim().trim_matches(|c| c == '`' || c == '"' || c == '\'');
    if let Some((_, rest)) = text.split_once("v=") {
        return rest.split(['&', ' ', '\n']).next().unwrap_or_default().to_string();
    }
    if let Some((_, rest)) = text.split_once("youtu.be/") {
        return rest.split(['?', ' ', '\n']).next().unwrap_or_default().to_string();
    }
    text.to_string()
}
