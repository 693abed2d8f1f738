use crate::content::{Blob, Content};
use crate::tools::{FunctionResponse, LiveTool, ToolCall, ToolResponse};

// Outgoing messages

/// Messages written onto the live channel, externally tagged:
/// `{"setup": {..}}`, `{"realtimeInput": {..}}`, `{"toolResponse": {..}}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    pub fn media(blob: Blob) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![blob],
        })
    }

    pub fn function_responses(responses: Vec<FunctionResponse>) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: responses,
        })
    }
}

/// Opening configuration of a live session. It cannot be changed on an open channel.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<LiveTool>,
    /// Present (as `{}`) to have the server transcribe the user's speech.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

impl SpeechConfig {
    pub fn prebuilt(voice_name: &str) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

// Incoming messages

/// A single inbound message. The service populates exactly one of the
/// payload fields per message; `usage_metadata` may ride along with any.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

impl ServerMessage {
    /// Base64 audio payload of the model turn, if the message carries one.
    pub fn audio_data(&self) -> Option<&str> {
        self.server_content
            .as_ref()?
            .model_turn
            .as_ref()?
            .first_inline_data()
            .map(|blob| blob.data.as_str())
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.interrupted)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: i64,
    #[serde(default)]
    pub response_token_count: i64,
    #[serde(default)]
    pub total_token_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Blob;

    #[test]
    fn realtime_input_uses_media_chunks() {
        let msg = ClientMessage::media(Blob::pcm16k("AAA="));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "realtimeInput": {
                    "mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAA="}]
                }
            })
        );
    }

    #[test]
    fn tool_response_echoes_id_and_name() {
        let msg = ClientMessage::function_responses(vec![FunctionResponse {
            id: "call-1".to_string(),
            name: "changeFace".to_string(),
            response: serde_json::json!({"result": {"status": "ok"}}),
        }]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["toolResponse"]["functionResponses"][0]["id"], "call-1");
        assert_eq!(json["toolResponse"]["functionResponses"][0]["name"], "changeFace");
    }

    #[test]
    fn parses_audio_turn() {
        let text = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#;
        let msg: ServerMessage = serde_json::from_str(text).unwrap();
        assert_eq!(msg.audio_data(), Some("AAAA"));
        assert!(!msg.is_interrupted());
    }

    #[test]
    fn parses_interrupt_and_tool_call() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert!(msg.is_interrupted());
        assert_eq!(msg.audio_data(), None);

        let msg: ServerMessage = serde_json::from_str(
            r#"{"toolCall":{"functionCalls":[{"id":"a","name":"performSearch","args":{"query":"weather"}}]}}"#,
        )
        .unwrap();
        let calls = msg.tool_call.unwrap().function_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args["query"], "weather");
    }

    #[test]
    fn setup_complete_is_detected() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
    }
}
