//! The fixed registry of functions the model may call.
use gemini_live_types::FunctionDeclaration;
use serde_json::{Value, json};

use crate::events::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    ChangeFace,
    PerformSearch,
    PerformMapSearch,
    GenerateCode,
    GenerateImage,
    PlayYoutube,
    RequestTextInput,
    RequestFileUpload,
    RenderHtml,
    UpdatePersonality,
    ExportKnowledge,
    ResetPersonality,
}

/// Tools answered in-process, before the dispatch returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTool {
    ChangeFace,
    RequestTextInput,
    RequestFileUpload,
    RenderHtml,
    UpdatePersonality,
    ExportKnowledge,
    ResetPersonality,
}

/// Tools that call out to the service through the backoff executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTool {
    PerformSearch,
    PerformMapSearch,
    GenerateCode,
    GenerateImage,
    PlayYoutube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Local(LocalTool),
    Remote(RemoteTool),
}

impl From<RemoteTool> for ToolName {
    fn from(tool: RemoteTool) -> Self {
        match tool {
            RemoteTool::PerformSearch => ToolName::PerformSearch,
            RemoteTool::PerformMapSearch => ToolName::PerformMapSearch,
            RemoteTool::GenerateCode => ToolName::GenerateCode,
            RemoteTool::GenerateImage => ToolName::GenerateImage,
            RemoteTool::PlayYoutube => ToolName::PlayYoutube,
        }
    }
}

impl ToolName {
    pub const ALL: [ToolName; 12] = [
        ToolName::ChangeFace,
        ToolName::PerformSearch,
        ToolName::PerformMapSearch,
        ToolName::GenerateCode,
        ToolName::GenerateImage,
        ToolName::PlayYoutube,
        ToolName::RequestTextInput,
        ToolName::RequestFileUpload,
        ToolName::RenderHtml,
        ToolName::UpdatePersonality,
        ToolName::ExportKnowledge,
        ToolName::ResetPersonality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ChangeFace => "changeFace",
            ToolName::PerformSearch => "performSearch",
            ToolName::PerformMapSearch => "performMapSearch",
            ToolName::GenerateCode => "generateCode",
            ToolName::GenerateImage => "generateImage",
            ToolName::PlayYoutube => "playYoutube",
            ToolName::RequestTextInput => "requestTextInput",
            ToolName::RequestFileUpload => "requestFileUpload",
            ToolName::RenderHtml => "renderHtml",
            ToolName::UpdatePersonality => "updatePersonality",
            ToolName::ExportKnowledge => "exportKnowledge",
            ToolName::ResetPersonality => "resetPersonality",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolName::ChangeFace => ToolKind::Local(LocalTool::ChangeFace),
            ToolName::PerformSearch => ToolKind::Remote(RemoteTool::PerformSearch),
            ToolName::PerformMapSearch => ToolKind::Remote(RemoteTool::PerformMapSearch),
            ToolName::GenerateCode => ToolKind::Remote(RemoteTool::GenerateCode),
            ToolName::GenerateImage => ToolKind::Remote(RemoteTool::GenerateImage),
            ToolName::PlayYoutube => ToolKind::Remote(RemoteTool::PlayYoutube),
            ToolName::RequestTextInput => ToolKind::Local(LocalTool::RequestTextInput),
            ToolName::RequestFileUpload => ToolKind::Local(LocalTool::RequestFileUpload),
            ToolName::RenderHtml => ToolKind::Local(LocalTool::RenderHtml),
            ToolName::UpdatePersonality => ToolKind::Local(LocalTool::UpdatePersonality),
            ToolName::ExportKnowledge => ToolKind::Local(LocalTool::ExportKnowledge),
            ToolName::ResetPersonality => ToolKind::Local(LocalTool::ResetPersonality),
        }
    }


    /// Human name of the action, used in degraded responses and apologies.
    pub fn action(&self) -> &'static str {
        match self {
            ToolName::ChangeFace => "expression change",
            ToolName::PerformSearch => "web search",
            ToolName::PerformMapSearch => "map search",
            ToolName::GenerateCode => "code generation",
            ToolName::GenerateImage => "image generation",
            ToolName::PlayYoutube => "video lookup",
            ToolName::RequestTextInput => "text input request",
            ToolName::RequestFileUpload => "file upload request",
            ToolName::RenderHtml => "html render",
            ToolName::UpdatePersonality => "personality update",
            ToolName::ExportKnowledge => "knowledge export",
            ToolName::ResetPersonality => "personality reset",
        }
    }

    pub fn declaration(&self) -> FunctionDeclaration {
        let name = self.as_str();
        match self {
            ToolName::ChangeFace => {
                let faces: Vec<&str> = Expression::REQUESTABLE.iter().map(|e| e.as_str()).collect();
                FunctionDeclaration::new(
                    name,
                    "Changes the facial expression of the avatar to match the mood of the conversation.",
                    object(json!({
                        "expression": {
                            "type": "STRING",
                            "description": "The expression to show.",
                            "enum": faces,
                        }
                    }), &["expression"]),
                )
            }
            ToolName::PerformSearch => FunctionDeclaration::new(
                name,
                "Searches the web for up-to-date information and returns a short summary.",
                object(string_param("query", "What to search for."), &["query"]),
            ),
            ToolName::PerformMapSearch => FunctionDeclaration::new(
                name,
                "Looks up places, directions or geographical information near the user.",
                object(string_param("query", "The place or route to look up."), &["query"]),
            ),
            ToolName::GenerateCode => FunctionDeclaration::new(
                name,
                "Writes a piece of code and shows it to the user.",
                object(
                    json!({
                        "request": {"type": "STRING", "description": "What the code should do."},
                        "language": {"type": "STRING", "description": "Programming language, if the user named one."},
                    }),
                    &["request"],
                ),
            ),
            ToolName::GenerateImage => FunctionDeclaration::new(
                name,
                "Draws a picture and shows it to the user.",
                object(string_param("prompt", "Description of the picture."), &["prompt"]),
            ),
            ToolName::PlayYoutube => FunctionDeclaration::new(
                name,
                "Finds a YouTube video or song and plays it.",
                object(string_param("query", "The video or song to play."), &["query"]),
            ),
            ToolName::RequestTextInput => FunctionDeclaration::new(
                name,
                "Asks the user to type something, for text that is hard to say out loud.",
                object(string_param("prompt", "What to ask the user for."), &["prompt"]),
            ),
            ToolName::RequestFileUpload => FunctionDeclaration::new(
                name,
                "Asks the user to share a file or picture.",
                object(string_param("prompt", "What file to ask for."), &["prompt"]),
            ),
            ToolName::RenderHtml => FunctionDeclaration::new(
                name,
                "Shows a small self-contained HTML page in a sandbox.",
                object(string_param("html", "The complete HTML document."), &["html"]),
            ),
            ToolName::UpdatePersonality => FunctionDeclaration::new(
                name,
                "Remembers new facts about the user or changes how you speak.",
                object(
                    json!({
                        "voice": {"type": "STRING", "description": "Prebuilt voice name."},
                        "endearingTerms": {"type": "ARRAY", "items": {"type": "STRING"}},
                        "learnedFacts": {"type": "ARRAY", "items": {"type": "STRING"}},
                        "creatorName": {"type": "STRING"},
                    }),
                    &[],
                ),
            ),
            ToolName::ExportKnowledge => FunctionDeclaration::new(
                name,
                "Exports everything you have learned about the user to a file.",
                object(json!({}), &[]),
            ),
            ToolName::ResetPersonality => FunctionDeclaration::new(
                name,
                "Forgets everything learned and restores the default personality.",
                object(json!({}), &[]),
            ),
        }
    }
}

fn string_param(name: &str, description: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        name.to_string(),
        json!({"type": "STRING", "description": description}),
    );
    Value::Object(properties)
}

fn object(properties: Value, required: &[&str]) -> Value {
    let mut schema = json!({"type": "OBJECT", "properties": properties});
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

/// Declarations of every registered tool, in registry order.
pub fn declarations() -> Vec<FunctionDeclaration> {
    ToolName::ALL.iter().map(ToolName::declaration).collect()
}

/// Reads a required, non-blank string argument.
pub(crate) fn string_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
