// Structural source analysis - the pluggable parser model and the
// semantic conflict analyzer built on top of it.

pub mod analyzer;
pub mod parser;
pub mod types;

pub use analyzer::{
    AnalysisSummary, ImpactAnalysis, SemanticAnalyzer, SemanticConflict, SemanticConflictKind,
};
pub use parser::{content_hash, FallbackParser, PythonParser, RegexParser, StructuralParser};
pub use types::{
    ClassDefinition, FunctionSignature, ImportInfo, SemanticContext, Visibility,
};
