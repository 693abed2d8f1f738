use gemini_live_types::live::UsageMetadata;

/// Token usage accumulated from the `usageMetadata` the server attaches to messages.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    total_tokens: i64,
    prompt_tokens: i64,
    response_tokens: i64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn update_usage(&mut self, usage: &UsageMetadata) {
        self.total_tokens += usage.total_token_count;
        self.prompt_tokens += usage.prompt_token_count;
        self.response_tokens += usage.response_token_count;
    }

    pub fn total_tokens(&self) -> i64 {
        self.total_tokens
    }

    pub fn prompt_tokens(&self) -> i64 {
        self.prompt_tokens
    }

    pub fn response_tokens(&self) -> i64 {
        self.response_tokens
    }
}
