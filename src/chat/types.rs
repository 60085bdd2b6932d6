use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Position in the session; increases monotonically and is never reused
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub token_count: Option<usize>,
}

impl ChatMessage {
    pub(crate) fn new(role: Role, content: impl Into<String>, index: u64) -> Self {
        ChatMessage {
            role,
            content: content.into(),
            index,
            timestamp: Utc::now(),
            token_count: None,
        }
    }

    /// Rough token count used for context trimming.
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// One token per four characters, rounded up, at least one per message.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4).max(1)
}

/// Token accounting reported by the endpoint at the end of a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
    #[serde(default)]
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
    Streaming,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingResponse => "awaiting response",
            SessionState::Streaming => "streaming",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Timing of the most recent completed reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnStats {
    pub tokens: usize,
    pub duration: Duration,
}

impl TurnStats {
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.tokens as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStats {
    pub id: String,
    pub model: String,
    pub messages: usize,
    pub turns: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub duration: Duration,
    pub last_turn: Option<TurnStats>,
}
