//! Terminal presentation of a session: status line, avatar face and the
//! history of rich results.
use std::time::Instant;

use companion_core::avatar::AvatarState;
use companion_core::events::{Expression, History, HistoryItem, SessionEvent, SessionObserver, Status};
use companion_core::personality::PersonalityUpdate;

/// Requests from the session that need the orchestrator to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    UpdatePersonality(PersonalityUpdate),
    ExportKnowledge,
    ResetPersonality,
    ApiKeyInvalid,
}

#[derive(Default)]
pub struct ConsoleObserver {
    avatar: AvatarState,
    face: Option<Expression>,
    history: History,
    actions: Vec<Action>,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: SessionEvent) {
        let now = Instant::now();
        self.avatar.apply(&event, now);
        event.deliver(self);
        self.refresh(now);
    }

    /// Redraws the face if it changed, e.g. after a requested face expired.
    pub fn refresh(&mut self, now: Instant) {
        let face = self.avatar.display(now);
        if self.face != Some(face) {
            self.face = Some(face);
            println!("[{}]", face.as_str());
        }
    }

    pub fn face(&self) -> Option<Expression> {
        self.face
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_status_change(&mut self, status: Status) {
        println!("-- {status} --");
    }

    fn on_new_history_item(&mut self, item: HistoryItem) {
        println!("{}", describe(&item));
        self.history.push(item);
    }

    fn on_apology(&mut self, action: &str) {
        println!("Sorry, the {action} did not work this time.");
    }

    fn on_api_key_invalid(&mut self) {
        self.actions.push(Action::ApiKeyInvalid);
    }

    fn on_personality_update(&mut self, update: PersonalityUpdate) {
        self.actions.push(Action::UpdatePersonality(update));
    }

    fn on_export_knowledge(&mut self) {
        self.actions.push(Action::ExportKnowledge);
    }

    fn on_reset_personality(&mut self) {
        self.actions.push(Action::ResetPersonality);
    }
}

pub fn describe(item: &HistoryItem) -> String {
    match item {
        HistoryItem::Search { summary, links } => {
            let mut text = format!("[search] {summary}");
            for link in links {
                text.push_str(&format!("\n  - {} <{}>", link.title, link.uri));
            }
            text
        }
        HistoryItem::Code { language, code } => format!("[code: {language}]\n{code}"),
        HistoryItem::Image {
            prompt,
            mime_type,
            data,
        } => format!("[image: {mime_type}, {} base64 chars] {prompt}", data.len()),
        HistoryItem::Youtube { video_id, query } => {
            format!("[video] {query}: https://www.youtube.com/watch?v={video_id}")
        }
        HistoryItem::TextInput { prompt } => format!("[type a reply] {prompt}"),
        HistoryItem::FileUpload { prompt } => {
            format!("[upload a file with --upload] {prompt}")
        }
        HistoryItem::Html { html } => format!("[html, {} bytes]", html.len()),
        HistoryItem::UserText { text } => format!("> {text}"),
    }
}
