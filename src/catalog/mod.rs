// Declare submodules
mod alias;
mod backend;
mod huggingface;
mod types;

// Re-export types for external use
pub use alias::{AliasEntry, AliasTable};
pub use backend::{build_backends, CatalogBackend};
pub use huggingface::HuggingFaceBackend;
pub use types::{display_name_for, is_single_gguf, ModelCandidate, QuantTag};
