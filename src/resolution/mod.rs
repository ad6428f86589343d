// Conflict handling - detection/resolution engine, the semantic merger,
// and the risk-scored auto-resolution orchestrator.

pub mod auto;
pub mod engine;
pub mod merger;

pub use auto::{
    AutoResolutionMode, AutoResolutionResult, AutoResolver, ResolutionOutcome,
};
pub use engine::{
    ConflictInfo, ConflictResolutionEngine, ConflictSeverity, ConflictSummary, ConflictType,
    ResolutionResult, ResolutionStats, ResolutionStrategy,
};
pub use merger::{
    MergeResolution, MergeResult, MergeStats, MergeStrategy, SemanticMerger,
};
