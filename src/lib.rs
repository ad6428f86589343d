// Polymerge - coordination core for multiple coding agents working on
// isolated git branches of one repository. Exposes branch lifecycle
// management, structural conflict analysis, detection/prediction/prevention,
// semantic merging, and the inter-agent collaboration substrate.

pub mod analysis;
pub mod collaboration;
pub mod config;
pub mod error;
pub mod git;
pub mod pool;
pub mod prediction;
pub mod resolution;
pub mod telemetry;

// Re-export key types for easy access
pub use analysis::{
    FunctionSignature, PythonParser, SemanticAnalyzer, SemanticConflict, SemanticConflictKind,
    SemanticContext, StructuralParser,
};
pub use collaboration::{
    AgentDirectory, CollaborationEngine, CollaborationMessage, CollaborationMode, FixedDirectory,
    MessagePriority, MessageType, SharedKnowledge,
};
pub use config::PolymergeConfig;
pub use error::{PolymergeError, Result};
pub use git::{BranchInfo, BranchManager, BranchStatus, GitClient};
pub use pool::{Agent, AgentPool, AgentState, Task, TaskStatus};
pub use prediction::{
    ConflictPattern, ConflictPredictor, ConflictPreventionSystem, PredictionConfidence,
    PredictionResult, PreventionMeasure,
};
pub use resolution::{
    AutoResolutionMode, AutoResolver, ConflictInfo, ConflictResolutionEngine, ConflictSeverity,
    ConflictType, MergeResolution, MergeResult, MergeStrategy, ResolutionOutcome,
    ResolutionStrategy, SemanticMerger,
};
pub use telemetry::init_tracing;
