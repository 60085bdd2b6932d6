// Declare submodules
mod store;
mod types;

// Re-export types for external use
pub use store::{ModelStore, DESIGNATOR};
pub use types::LocalModel;
