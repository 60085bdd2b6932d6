//! Find GGUF models across remote catalogs, fetch them into a local models
//! directory, and chat with them through an OpenAI-compatible server.

pub mod catalog;
pub mod chat;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod registry;
pub mod resolver;

pub use error::{BackendError, PalError, Result};
