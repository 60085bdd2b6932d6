use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::client::{GenerationEndpoint, GenerationRequest, SamplingParams, StreamEvent, TokenStream, WireMessage};
use super::types::{ChatMessage, Role, SessionState, SessionStats, TurnStats, Usage};
use crate::config::ApiConfig;
use crate::error::{PalError, Result};

/// Per-session settings taken from the `api` configuration section.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub system_prompt: Option<String>,
    pub context_budget: Option<usize>,
    pub sampling: SamplingParams,
}

impl From<&ApiConfig> for SessionOptions {
    fn from(config: &ApiConfig) -> Self {
        SessionOptions {
            system_prompt: config.system_prompt.clone().filter(|p| !p.trim().is_empty()),
            context_budget: config.context_token_budget,
            sampling: SamplingParams::from(config),
        }
    }
}

/// A multi-turn conversation with one model.
pub struct ChatSession {
    id: Uuid,
    model: String,
    endpoint: Arc<dyn GenerationEndpoint>,
    sampling: SamplingParams,
    context_budget: Option<usize>,
    messages: Vec<ChatMessage>,
    next_index: u64,
    state: SessionState,
    prompt_tokens: usize,
    completion_tokens: usize,
    turns: usize,
    last_turn: Option<TurnStats>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl ChatSession {
    pub fn new(model: impl Into<String>, endpoint: Arc<dyn GenerationEndpoint>, options: SessionOptions) -> Self {
        let mut session = ChatSession {
            id: Uuid::new_v4(),
            model: model.into(),
            endpoint,
            sampling: options.sampling,
            context_budget: options.context_budget,
            messages: Vec::new(),
            next_index: 0,
            state: SessionState::Idle,
            prompt_tokens: 0,
            completion_tokens: 0,
            turns: 0,
            last_turn: None,
            started_at: Utc::now(),
            started: Instant::now(),
        };
        if let Some(prompt) = options.system_prompt {
            session.push(Role::System, prompt, None);
        }
        info!("Chat session {} started with model {}", session.id, session.model);
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Submits a user message and starts streaming the reply.
    ///
    /// Only one turn can be in flight; the returned [`Turn`] borrows the
    /// session until it finishes, fails, or is cancelled.
    pub fn send(&mut self, text: &str) -> Result<Turn<'_>> {
        if self.state != SessionState::Idle {
            return Err(PalError::SessionBusy(self.state.to_string()));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(PalError::InvalidQuery("message must not be empty".to_string()));
        }

        let estimate = super::types::estimate_tokens(text);
        let user_index = self.push(Role::User, text, Some(estimate));
        let window = self.request_window();
        debug!(
            "Sending {} of {} messages for turn {}",
            window.len(),
            self.messages.len(),
            user_index
        );

        let request = GenerationRequest::new(&self.model, window, &self.sampling);
        let stream = self.endpoint.start(request);
        self.state = SessionState::AwaitingResponse;

        Ok(Turn {
            session: self,
            stream,
            user_index,
            reply: String::new(),
            fragments: 0,
            started: Instant::now(),
            finished: false,
        })
    }

    /// Drops every non-system message. Indices keep increasing afterwards.
    pub fn clear_history(&mut self) {
        let before = self.messages.len();
        self.messages.retain(|m| m.role == Role::System);
        info!("Cleared {} messages from session {}", before - self.messages.len(), self.id);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            id: self.id.to_string(),
            model: self.model.clone(),
            messages: self.messages.iter().filter(|m| m.role != Role::System).count(),
            turns: self.turns,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            duration: self.started.elapsed(),
            last_turn: self.last_turn,
        }
    }

    fn push(&mut self, role: Role, content: impl Into<String>, token_count: Option<usize>) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        let mut message = ChatMessage::new(role, content, index);
        message.token_count = token_count;
        self.messages.push(message);
        index
    }

    /// Messages sent with the next request. The history itself is not touched.
    fn request_window(&self) -> Vec<WireMessage> {
        trim_to_budget(&self.messages, self.context_budget)
            .into_iter()
            .map(WireMessage::from)
            .collect()
    }

    /// Ends a turn that produced no reply. History is append-only, so the
    /// user message stays and only the in-progress reply is dropped.
    fn discard_reply(&mut self) {
        self.state = SessionState::Idle;
    }
}

/// Picks the trailing window that fits `budget`.
///
/// Oldest non-system messages go first, a user message together with the
/// assistant reply that follows it. System messages and the newest message
/// always stay, even if they alone exceed the budget.
pub fn trim_to_budget(messages: &[ChatMessage], budget: Option<usize>) -> Vec<&ChatMessage> {
    let Some(budget) = budget else {
        return messages.iter().collect();
    };

    let mut keep = vec![true; messages.len()];
    let mut total: usize = messages.iter().map(ChatMessage::estimated_tokens).sum();
    let newest = messages.len().saturating_sub(1);
    let mut cursor = 0;

    while total > budget {
        let Some(oldest) = (cursor..newest).find(|&i| messages[i].role != Role::System) else {
            break;
        };
        keep[oldest] = false;
        total -= messages[oldest].estimated_tokens();
        cursor = oldest + 1;

        if messages[oldest].role == Role::User {
            if let Some(reply) = (cursor..newest).find(|&i| messages[i].role != Role::System) {
                if messages[reply].role == Role::Assistant {
                    keep[reply] = false;
                    total -= messages[reply].estimated_tokens();
                    cursor = reply + 1;
                }
            }
        }
    }

    messages
        .iter()
        .zip(keep)
        .filter_map(|(m, k)| k.then_some(m))
        .collect()
}

/// One in-flight reply.
///
/// Fragments are pulled with [`Turn::next`]. Cancelling, or dropping the
/// turn before the end marker, aborts the request and discards the partial
/// reply; the user message stays in the history.
pub struct Turn<'a> {
    session: &'a mut ChatSession,
    stream: TokenStream,
    user_index: u64,
    reply: String,
    fragments: usize,
    started: Instant,
    finished: bool,
}

impl Turn<'_> {
    /// Next text fragment; `None` once the reply is complete.
    pub async fn next(&mut self) -> Option<Result<String>> {
        if self.finished {
            return None;
        }
        match self.stream.next().await {
            Some(StreamEvent::Fragment(text)) => {
                if self.session.state == SessionState::AwaitingResponse {
                    debug!("First fragment after {:?}", self.started.elapsed());
                    self.session.state = SessionState::Streaming;
                }
                self.reply.push_str(&text);
                self.fragments += 1;
                Some(Ok(text))
            }
            Some(StreamEvent::Done(usage)) => {
                self.complete(usage);
                None
            }
            Some(StreamEvent::Failed(reason)) => Some(Err(self.fail(reason))),
            None => Some(Err(self.fail("generation stream closed unexpectedly".to_string()))),
        }
    }

    /// Text received so far.
    pub fn partial(&self) -> &str {
        &self.reply
    }

    /// Drains the stream and returns the whole reply.
    pub async fn collect(mut self) -> Result<String> {
        while let Some(fragment) = self.next().await {
            fragment?;
        }
        Ok(self.session.messages.last().map(|m| m.content.clone()).unwrap_or_default())
    }

    /// Aborts the request and discards the partial reply.
    pub fn cancel(mut self) {
        self.abandon();
        info!("Turn {} cancelled", self.user_index);
    }

    fn complete(&mut self, usage: Option<Usage>) {
        self.finished = true;
        let duration = self.started.elapsed();
        let tokens = usage
            .map(|u| u.completion_tokens)
            .filter(|t| *t > 0)
            .unwrap_or(self.fragments);

        let session = &mut *self.session;
        let reply = std::mem::take(&mut self.reply);
        session.push(Role::Assistant, reply, Some(tokens));
        session.prompt_tokens += usage.map(|u| u.prompt_tokens).unwrap_or(0);
        session.completion_tokens += tokens;
        session.turns += 1;
        session.last_turn = Some(TurnStats { tokens, duration });
        session.state = SessionState::Idle;
        debug!("Turn {} finished: {} tokens in {:?}", self.user_index, tokens, duration);
    }

    fn fail(&mut self, reason: String) -> PalError {
        self.finished = true;
        self.session.state = SessionState::Error;
        error!("Turn {} failed: {}", self.user_index, reason);
        self.stream.abort();
        self.reply.clear();
        self.session.discard_reply();
        PalError::GenerationFailed(reason)
    }

    fn abandon(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.stream.abort();
        self.reply.clear();
        self.session.discard_reply();
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Unfinished turn {} dropped", self.user_index);
            self.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: Role, chars: usize, index: u64) -> ChatMessage {
        ChatMessage::new(role, "x".repeat(chars), index)
    }

    #[test]
    fn no_budget_keeps_everything() {
        let history = vec![message(Role::User, 400, 0), message(Role::Assistant, 400, 1)];
        assert_eq!(trim_to_budget(&history, None).len(), 2);
    }

    #[test]
    fn oldest_pair_goes_first() {
        // 10 + 100 + 100 + 100 + 100 + 10 tokens
        let history = vec![
            message(Role::System, 40, 0),
            message(Role::User, 400, 1),
            message(Role::Assistant, 400, 2),
            message(Role::User, 400, 3),
            message(Role::Assistant, 400, 4),
            message(Role::User, 40, 5),
        ];
        let window = trim_to_budget(&history, Some(250));
        let indices: Vec<_> = window.iter().map(|m| m.index).collect();
        assert_eq!(indices, [0, 3, 4, 5]);
    }

    #[test]
    fn system_and_newest_message_always_survive() {
        let history = vec![
            message(Role::System, 400, 0),
            message(Role::User, 400, 1),
            message(Role::Assistant, 400, 2),
            message(Role::User, 400, 3),
        ];
        let window = trim_to_budget(&history, Some(10));
        let indices: Vec<_> = window.iter().map(|m| m.index).collect();
        assert_eq!(indices, [0, 3]);
    }

    #[test]
    fn unpaired_user_message_is_dropped_alone() {
        let history = vec![
            message(Role::User, 400, 0),
            message(Role::User, 400, 1),
            message(Role::Assistant, 400, 2),
            message(Role::User, 4, 3),
        ];
        let window = trim_to_budget(&history, Some(250));
        let indices: Vec<_> = window.iter().map(|m| m.index).collect();
        assert_eq!(indices, [1, 2, 3]);
    }
}
