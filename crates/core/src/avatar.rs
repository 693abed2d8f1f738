use std::time::{Duration, Instant};

use crate::events::{Expression, SessionEvent, Status};

/// How long a face requested by the model stays up before the derived one returns.
pub const EXPRESSION_OVERRIDE_TTL: Duration = Duration::from_secs(4);

/// Derives the avatar face from the session status, the speaking flag and
/// the last face the model asked for.
#[derive(Debug, Clone)]
pub struct AvatarState {
    status: Status,
    speaking: bool,
    requested: Option<(Expression, Instant)>,
}

impl Default for AvatarState {
    fn default() -> Self {
        Self {
            status: Status::Idle,
            speaking: false,
            requested: None,
        }
    }
}

impl AvatarState {
    pub fn apply(&mut self, event: &SessionEvent, now: Instant) {
        match event {
            SessionEvent::StatusChanged(status) => self.status = *status,
            SessionEvent::SpeakingChanged(speaking) => self.speaking = *speaking,
            SessionEvent::ExpressionChanged(expression) => {
                self.requested = Some((*expression, now))
            }
            _ => {}
        }
    }

    pub fn display(&self, now: Instant) -> Expression {
        if let Some((expression, at)) = self.requested {
            if now.saturating_duration_since(at) < EXPRESSION_OVERRIDE_TTL {
                return expression;
            }
        }
        match self.status {
            Status::Error => Expression::Sad,
            Status::Connecting | Status::Searching => Expression::Loading,
            Status::Reading => Expression::Reading,
            _ if self.speaking || self.status == Status::Speaking => Expression::Speaking,
            Status::Listening => Expression::Neutral,
            _ => Expression::Sleeping,
        }
    }
}
