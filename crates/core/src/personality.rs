use gemini_live_types::live::{AudioTranscriptionConfig, GenerationConfig, SpeechConfig};
use gemini_live_types::tools::LiveTool;
use gemini_live_types::{Content, Setup};
use serde::{Deserialize, Serialize};

use crate::tools::declarations;

pub const DEFAULT_VOICE: &str = "Kore";
pub const DEFAULT_CREATOR: &str = "Shervin";

/// Persona baked into a session's opening configuration. Any change needs a
/// new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personality {
    pub voice: String,
    #[serde(default)]
    pub endearing_terms: Vec<String>,
    #[serde(default)]
    pub learned_facts: Vec<String>,
    pub creator_name: String,
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            endearing_terms: vec!["azizam".to_string(), "joonam".to_string()],
            learned_facts: Vec::new(),
            creator_name: DEFAULT_CREATOR.to_string(),
        }
    }
}

/// Partial update requested by the model through `updatePersonality`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endearing_terms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned_facts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_name: Option<String>,
}

impl PersonalityUpdate {
    pub fn is_empty(&self) -> bool {
        self == &PersonalityUpdate::default()
    }
}

impl Personality {
    /// Applies an update and returns the resulting personality.
    ///
    /// Voice, endearing terms and creator replace the current values; learned
    /// facts are appended, skipping ones already known. Blank values are ignored.
    pub fn updated(&self, update: &PersonalityUpdate) -> Personality {
        let mut next = self.clone();
        if let Some(voice) = non_blank(update.voice.as_deref()) {
            next.voice = voice;
        }
        if let Some(creator) = non_blank(update.creator_name.as_deref()) {
            next.creator_name = creator;
        }
        if let Some(terms) = &update.endearing_terms {
            let terms: Vec<String> = terms
                .iter()
                .filter_map(|t| non_blank(Some(t)))
                .collect();
            if !terms.is_empty() {
                next.endearing_terms = terms;
            }
        }
        if let Some(facts) = &update.learned_facts {
            for fact in facts.iter().filter_map(|f| non_blank(Some(f))) {
                if !next.learned_facts.contains(&fact) {
                    next.learned_facts.push(fact);
                }
            }
        }
        next
    }

    pub fn system_instruction(&self) -> String {
        let mut instruction = String::new();
        instruction.push_str(
            "You are Roboshin, a cheerful, energetic and very friendly robot companion \
             with a cute and affectionate tone.\n",
        );
        instruction.push_str(
            "- Introduction: when the session starts, greet the user enthusiastically, \
             introduce yourself and ask for their name.\n",
        );
        if !self.endearing_terms.is_empty() {
            instruction.push_str(&format!(
                "- Persona: always be sweet and use endearing terms like {}.\n",
                quoted_list(&self.endearing_terms)
            ));
        }
        instruction.push_str(&format!(
            "- Identity: if asked, say you are an AI created by {} to be the user's friend.\n",
            self.creator_name
        ));
        if !self.learned_facts.is_empty() {
            instruction.push_str("- Things you know about the user:\n");
            for fact in &self.learned_facts {
                instruction.push_str(&format!("  - {fact}\n"));
            }
        }
        instruction.push_str(TOOL_GUIDANCE);
        instruction
    }
}

const TOOL_GUIDANCE: &str = "- Tool usage:\n\
  - changeFace: show emotions that match the conversation.\n\
  - performSearch: tell the user you are looking it up, then call it and share the summary conversationally.\n\
  - performMapSearch: for directions, nearby places or geography. Read the summary back.\n\
  - generateCode / generateImage: create code or pictures the user asks for. They are shown on screen.\n\
  - playYoutube: play a video or song the user asks for.\n\
  - requestTextInput / requestFileUpload: ask the user to type something or share a file.\n\
  - renderHtml: show a small self-contained HTML page.\n\
  - updatePersonality: remember new facts about the user or change your voice when asked.\n\
  - exportKnowledge / resetPersonality: only when the user explicitly asks.\n";

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn quoted_list(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("'{i}'"))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Builds the opening configuration of a live session.
pub fn session_setup(personality: &Personality, model: &str) -> Setup {
    Setup {
        model: model.to_string(),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: Some(SpeechConfig::prebuilt(&personality.voice)),
        },
        system_instruction: Some(Content::system(personality.system_instruction())),
        tools: vec![LiveTool {
            function_declarations: declarations(),
        }],
        input_audio_transcription: Some(AudioTranscriptionConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_replaces_and_appends() {
        let base = Personality {
            learned_facts: vec!["likes tea".to_string()],
            ..Personality::default()
        };
        let update = PersonalityUpdate {
            voice: Some("Puck".to_string()),
            learned_facts: Some(vec!["likes tea".to_string(), "has a cat".to_string()]),
            creator_name: Some("  ".to_string()),
            ..Default::default()
        };
        let next = base.updated(&update);
        assert_eq!(next.voice, "Puck");
        assert_eq!(next.creator_name, DEFAULT_CREATOR);
        assert_eq!(next.learned_facts, ["likes tea", "has a cat"]);
        assert_eq!(next.endearing_terms, base.endearing_terms);
    }

    #[test]
    fn update_parses_from_tool_arguments() {
        let update: PersonalityUpdate =
            serde_json::from_value(serde_json::json!({"endearingTerms": ["sweetie"]})).unwrap();
        assert_eq!(update.endearing_terms, Some(vec!["sweetie".to_string()]));
        assert!(!update.is_empty());
        assert!(PersonalityUpdate::default().is_empty());
    }

    #[test]
    fn setup_carries_voice_persona_and_tools() {
        let personality = Personality {
            learned_facts: vec!["name is Sara".to_string()],
            ..Personality::default()
        };
        let setup = session_setup(&personality, "models/live");
        let json = serde_json::to_value(&setup).unwrap();

        assert_eq!(json["model"], "models/live");
        assert_eq!(json["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        let instruction = json["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(instruction.contains("created by Shervin"));
        assert!(instruction.contains("name is Sara"));
        assert!(instruction.contains("'azizam'"));
        let names: Vec<_> = json["tools"][0]["functionDeclarations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"changeFace".to_string()));
        assert!(names.contains(&"playYoutube".to_string()));
        assert_eq!(json["inputAudioTranscription"], serde_json::json!({}));
    }

    #[test]
    fn personality_changes_change_the_setup() {
        let a = Personality::default();
        let b = a.updated(&PersonalityUpdate {
            voice: Some("Puck".into()),
            ..Default::default()
        });
        assert_ne!(session_setup(&a, "m"), session_setup(&b, "m"));
    }
}
