// Declare the display submodule
pub mod display;

// Declare the chat submodule (containing the chat_loop logic)
mod chat;

mod client;
mod session;
mod types;

// Re-export the public API
pub use chat::chat_loop;
pub use client::{
    sse_events, GenerationClient, GenerationEndpoint, GenerationRequest, SamplingParams, StreamEvent, TokenStream,
    WireMessage,
};
pub use session::{trim_to_budget, ChatSession, SessionOptions, Turn};
pub use types::{estimate_tokens, ChatMessage, Role, SessionState, SessionStats, TurnStats, Usage};
