// Conflict forecasting - heuristic vector scoring with pattern detectors,
// and the prevention system that turns predictions into proactive measures.

pub mod predictor;
pub mod prevention;

pub use predictor::{
    ConflictPattern, ConflictPredictor, ConflictVector, PredictionConfidence, PredictionResult,
    PredictionStats, PredictionSummary,
};
pub use prevention::{
    ConflictPreventionSystem, PreventionAction, PreventionMeasure, PreventionResult,
    PreventionStatus, PreventionStrategy,
};
