// Declare submodules
pub(crate) mod fuzzy;
mod resolver;
mod scoring;

// Re-export types for external use
pub use fuzzy::similarity;
pub use resolver::{Resolution, ResolvedArtifact, Resolver, ResolverSettings, SearchOutcome};
pub use scoring::{rank, score, select, Constraints, ScoredCandidate, Selection};
