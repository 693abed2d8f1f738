use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::personality::PersonalityUpdate;

/// Where the session is in its lifecycle, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Connecting,
    Listening,
    Speaking,
    Searching,
    Reading,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Idle => "idle",
            Status::Connecting => "connecting",
            Status::Listening => "listening",
            Status::Speaking => "speaking",
            Status::Searching => "searching",
            Status::Reading => "reading",
            Status::Error => "error",
        };
        f.write_str(name)
    }
}

/// Avatar faces. The first eight can be requested by the model through
/// `changeFace`; the rest are derived from the session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Love,
    Sad,
    Angry,
    Laughing,
    Surprised,
    Skeptical,
    Confused,
    Sleeping,
    Loading,
    Speaking,
    Reading,
}

impl Expression {
    /// Faces the model may pick.
    pub const REQUESTABLE: [Expression; 8] = [
        Expression::Neutral,
        Expression::Love,
        Expression::Sad,
        Expression::Angry,
        Expression::Laughing,
        Expression::Surprised,
        Expression::Skeptical,
        Expression::Confused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Love => "love",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Laughing => "laughing",
            Expression::Surprised => "surprised",
            Expression::Skeptical => "skeptical",
            Expression::Confused => "confused",
            Expression::Sleeping => "sleeping",
            Expression::Loading => "loading",
            Expression::Speaking => "speaking",
            Expression::Reading => "reading",
        }
    }

    /// Parses a face the model asked for. Derived-only faces are rejected.
    pub fn parse_requested(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::REQUESTABLE
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(name))
    }
}

/// A rich artifact shown alongside the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HistoryItem {
    Search {
        summary: String,
        links: Vec<SearchLink>,
    },
    #[serde(rename_all = "camelCase")]
    Code { language: String, code: String },
    #[serde(rename_all = "camelCase")]
    Image {
        prompt: String,
        mime_type: String,
        data: String,
    },
    #[serde(rename_all = "camelCase")]
    Youtube { video_id: String, query: String },
    TextInput { prompt: String },
    FileUpload { prompt: String },
    Html { html: String },
    UserText { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchLink {
    pub uri: String,
    pub title: String,
}

/// Everything the orchestrator reports to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged(Status),
    SpeakingChanged(bool),
    ExpressionChanged(Expression),
    HistoryItem(HistoryItem),
    /// A remote tool failed and the user should hear why.
    Apology { action: String },
    /// The credential was rejected. Emitted once per failure.
    ApiKeyInvalid,
    /// What the server heard the user say.
    Transcription(String),
    PersonalityUpdateRequested(PersonalityUpdate),
    ExportKnowledgeRequested,
    ResetPersonalityRequested,
}

pub type EventSink = mpsc::UnboundedSender<SessionEvent>;
pub type EventStream = mpsc::UnboundedReceiver<SessionEvent>;

/// Presentation callbacks. Every method defaults to doing nothing.
pub trait SessionObserver {
    fn on_status_change(&mut self, _status: Status) {}
    fn on_speaking_change(&mut self, _speaking: bool) {}
    fn on_expression_change(&mut self, _expression: Expression) {}
    fn on_new_history_item(&mut self, _item: HistoryItem) {}
    fn on_apology(&mut self, _action: &str) {}
    fn on_api_key_invalid(&mut self) {}
    fn on_personality_update(&mut self, _update: PersonalityUpdate) {}
    fn on_export_knowledge(&mut self) {}
    fn on_reset_personality(&mut self) {}
}

impl SessionEvent {
    /// Routes the event to the matching observer callback. Transcriptions
    /// become `userText` history items.
    pub fn deliver(self, observer: &mut dyn SessionObserver) {
        match self {
            SessionEvent::StatusChanged(status) => observer.on_status_change(status),
            SessionEvent::SpeakingChanged(speaking) => observer.on_speaking_change(speaking),
            SessionEvent::ExpressionChanged(e) => observer.on_expression_change(e),
            SessionEvent::HistoryItem(item) => observer.on_new_history_item(item),
            SessionEvent::Apology { action } => observer.on_apology(&action),
            SessionEvent::ApiKeyInvalid => observer.on_api_key_invalid(),
            SessionEvent::Transcription(text) => {
                if !text.trim().is_empty() {
                    observer.on_new_history_item(HistoryItem::UserText { text });
                }
            }
            SessionEvent::PersonalityUpdateRequested(update) => {
                observer.on_personality_update(update)
            }
            SessionEvent::ExportKnowledgeRequested => observer.on_export_knowledge(),
            SessionEvent::ResetPersonalityRequested => observer.on_reset_personality(),
        }
    }
}

/// History items in insertion order, read back most recent first.
#[derive(Debug, Default, Clone)]
pub struct History {
    items: VecDeque<HistoryItem>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: HistoryItem) {
        self.items.push_back(item);
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryItem> {
        self.items.iter().rev()
    }

    pub fn latest(&self) -> Option<&HistoryItem> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
