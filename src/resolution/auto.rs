use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::analysis::{SemanticAnalyzer, SemanticConflict, SemanticConflictKind};
use crate::error::Result;
use crate::git::GitClient;
use crate::prediction::{ConflictPredictor, PredictionResult};
use crate::resolution::engine::{ConflictResolutionEngine, ConflictSeverity, ResolutionStrategy};
use crate::resolution::merger::{MergeResolution, MergeResult, SemanticMerger};

/// Resolution aggressiveness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutoResolutionMode {
    Conservative,
    Balanced,
    Aggressive,
    Predictive,
}

impl AutoResolutionMode {
    pub fn slug(self) -> &'static str {
        match self {
            AutoResolutionMode::Conservative => "conservative",
            AutoResolutionMode::Balanced => "balanced",
            AutoResolutionMode::Aggressive => "aggressive",
            AutoResolutionMode::Predictive => "predictive",
        }
    }

    /// Minimum merge confidence accepted in this mode.
    pub fn confidence_threshold(self) -> f64 {
        match self {
            AutoResolutionMode::Conservative => 0.9,
            AutoResolutionMode::Balanced => 0.7,
            AutoResolutionMode::Aggressive => 0.5,
            AutoResolutionMode::Predictive => 0.8,
        }
    }
}

/// Outcome class of a resolution session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    FullyResolved,
    PartiallyResolved,
    EscalatedToHuman,
    ResolutionFailed,
}

impl ResolutionOutcome {
    pub fn slug(self) -> &'static str {
        match self {
            ResolutionOutcome::FullyResolved => "fully_resolved",
            ResolutionOutcome::PartiallyResolved => "partially_resolved",
            ResolutionOutcome::EscalatedToHuman => "escalated_to_human",
            ResolutionOutcome::ResolutionFailed => "resolution_failed",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            ResolutionOutcome::FullyResolved | ResolutionOutcome::PartiallyResolved
        )
    }
}

/// Result of one end-to-end auto-resolution session.
#[derive(Debug, Clone)]
pub struct AutoResolutionResult {
    pub session_id: String,
    pub branch1: String,
    pub branch2: String,
    pub target_branch: String,
    pub mode: AutoResolutionMode,
    pub outcome: ResolutionOutcome,
    pub conflicts_detected: usize,
    pub conflicts_resolved: usize,
    pub files_processed: usize,
    pub merge_results: Vec<MergeResult>,
    pub resolution_time_secs: f64,
    pub confidence_score: f64,
    pub semantic_integrity_preserved: bool,
    pub escalated_conflicts: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AutoResolutionStats {
    pub total_sessions: u64,
    pub successful_resolutions: u64,
    pub full_auto_resolutions: u64,
    pub escalated_to_human: u64,
    pub average_confidence: f64,
    pub semantic_integrity_rate: f64,
}

#[derive(Debug, Clone)]
struct PatternRecord {
    mode: AutoResolutionMode,
    confidence: f64,
}

/// Prediction-driven recommendation produced without touching the tree.
#[derive(Debug, Clone)]
pub struct PreventionRecommendation {
    pub prediction_id: String,
    pub pattern: String,
    pub suggestions: Vec<String>,
    pub automated: bool,
}

/// Orchestrates end-to-end risk-scored resolution sessions: detect
/// semantic conflicts, partition by mode policy, batch-merge the
/// resolvable ones, validate, and apply to the target branch.
///
/// Applying results is the single mutating step; concurrent sessions
/// against one target branch require external serialization by the caller.
pub struct AutoResolver {
    analyzer: Arc<SemanticAnalyzer>,
    merger: Arc<SemanticMerger>,
    engine: Arc<ConflictResolutionEngine>,
    predictor: Arc<ConflictPredictor>,
    git: GitClient,
    default_mode: AutoResolutionMode,
    history: Mutex<Vec<AutoResolutionResult>>,
    success_patterns: std::sync::Mutex<HashMap<String, Vec<PatternRecord>>>,
    failure_patterns: std::sync::Mutex<HashMap<String, Vec<PatternRecord>>>,
    stats: std::sync::Mutex<AutoResolutionStats>,
}

impl AutoResolver {
    pub fn new(
        analyzer: Arc<SemanticAnalyzer>,
        merger: Arc<SemanticMerger>,
        engine: Arc<ConflictResolutionEngine>,
        predictor: Arc<ConflictPredictor>,
        git: GitClient,
    ) -> Self {
        Self {
            analyzer,
            merger,
            engine,
            predictor,
            git,
            default_mode: AutoResolutionMode::Balanced,
            history: Mutex::new(Vec::new()),
            success_patterns: std::sync::Mutex::new(HashMap::new()),
            failure_patterns: std::sync::Mutex::new(HashMap::new()),
            stats: std::sync::Mutex::new(AutoResolutionStats::default()),
        }
    }

    pub fn engine(&self) -> &Arc<ConflictResolutionEngine> {
        &self.engine
    }

    /// Automatically resolve conflicts between two branches and apply the
    /// validated merges to the target branch (first branch by default).
    pub async fn auto_resolve_branch_conflicts(
        &self,
        branch1: &str,
        branch2: &str,
        target_branch: Option<&str>,
        mode: Option<AutoResolutionMode>,
    ) -> AutoResolutionResult {
        let mode = mode.unwrap_or(self.default_mode);
        let target = target_branch.unwrap_or(branch1).to_string();
        let session_id = format!(
            "auto_resolve:{branch1}:{branch2}:{}",
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let started = Instant::now();

        info!(session = %session_id, mode = mode.slug(), "Starting auto-resolution session");

        let conflicts = match self
            .analyzer
            .analyze_semantic_conflicts(branch1, branch2, None)
            .await
        {
            Ok(conflicts) => conflicts,
            Err(error) => {
                warn!(session = %session_id, %error, "Conflict detection failed");
                let mut metadata = HashMap::new();
                metadata.insert("error".to_string(), Value::from(error.to_string()));
                let result = self.session_result(
                    session_id,
                    branch1,
                    branch2,
                    target,
                    mode,
                    ResolutionOutcome::ResolutionFailed,
                    Vec::new(),
                    0,
                    Vec::new(),
                    started.elapsed().as_secs_f64(),
                    metadata,
                );
                self.record_session(&result, &[]).await;
                return result;
            }
        };

        if conflicts.is_empty() {
            info!(session = %session_id, "No conflicts detected");
            let mut result = self.session_result(
                session_id,
                branch1,
                branch2,
                target,
                mode,
                ResolutionOutcome::FullyResolved,
                Vec::new(),
                0,
                Vec::new(),
                started.elapsed().as_secs_f64(),
                HashMap::new(),
            );
            result.confidence_score = 1.0;
            self.record_session(&result, &[]).await;
            return result;
        }

        let total_conflicts = conflicts.len();
        let (resolvable, escalated) = partition_conflicts(conflicts.clone(), mode);
        info!(
            session = %session_id,
            resolvable = resolvable.len(),
            escalated = escalated.len(),
            "Assessed conflict resolvability"
        );

        // Batch-merge resolvable conflicts, then filter by mode policy.
        let merge_results = self.merger.auto_resolve_conflicts(resolvable).await;
        let threshold = mode.confidence_threshold();
        let passing: Vec<MergeResult> = merge_results
            .into_iter()
            .filter(|result| {
                result.merge_confidence >= threshold
                    && matches!(
                        result.resolution,
                        MergeResolution::AutoResolved | MergeResolution::PartialResolution
                    )
                    && result.semantic_integrity
            })
            .collect();

        let validated: Vec<MergeResult> = passing
            .into_iter()
            .filter(|result| self.validate_merge_result(result))
            .collect();

        let applied = self.apply_merge_results(&validated, &target).await;

        let outcome = determine_outcome(total_conflicts, escalated.len(), applied.len());
        let escalated_ids: Vec<String> =
            escalated.iter().map(|conflict| conflict.id.clone()).collect();

        let mut metadata = HashMap::new();
        metadata.insert("total_conflicts".to_string(), Value::from(total_conflicts));
        metadata.insert(
            "applied_results".to_string(),
            Value::from(applied.len()),
        );

        let mut result = self.session_result(
            session_id,
            branch1,
            branch2,
            target,
            mode,
            outcome,
            applied,
            total_conflicts,
            escalated_ids,
            started.elapsed().as_secs_f64(),
            metadata,
        );
        result.confidence_score = mean_confidence(&result.merge_results);
        result.semantic_integrity_preserved = result
            .merge_results
            .iter()
            .all(|merge| merge.semantic_integrity);

        self.record_session(&result, &conflicts).await;
        info!(session = %result.session_id, outcome = outcome.slug(), "Auto-resolution completed");
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn session_result(
        &self,
        session_id: String,
        branch1: &str,
        branch2: &str,
        target: String,
        mode: AutoResolutionMode,
        outcome: ResolutionOutcome,
        merge_results: Vec<MergeResult>,
        conflicts_detected: usize,
        escalated_conflicts: Vec<String>,
        resolution_time_secs: f64,
        metadata: HashMap<String, Value>,
    ) -> AutoResolutionResult {
        let files: BTreeSet<&str> = merge_results
            .iter()
            .map(|result| result.file_path.as_str())
            .collect();
        AutoResolutionResult {
            session_id,
            branch1: branch1.to_string(),
            branch2: branch2.to_string(),
            target_branch: target,
            mode,
            outcome,
            conflicts_detected,
            conflicts_resolved: merge_results.len(),
            files_processed: files.len(),
            merge_results,
            resolution_time_secs,
            confidence_score: 0.0,
            semantic_integrity_preserved: true,
            escalated_conflicts,
            metadata,
            resolved_at: Utc::now(),
        }
    }

    /// Merged content must exist, re-parse cleanly, and clear the floor
    /// confidence.
    fn validate_merge_result(&self, result: &MergeResult) -> bool {
        if !result.semantic_integrity {
            return false;
        }
        let Some(content) = &result.merged_content else {
            return false;
        };
        if self.analyzer.parser().handles(&result.file_path)
            && self.analyzer.parse_source(&result.file_path, content).is_err()
        {
            return false;
        }
        result.merge_confidence >= 0.5
    }

    /// Write validated merge results into the target branch's working tree
    /// and stage them. The sole mutating step of a session.
    async fn apply_merge_results(
        &self,
        results: &[MergeResult],
        target_branch: &str,
    ) -> Vec<MergeResult> {
        if results.is_empty() {
            return Vec::new();
        }

        if let Err(error) = self.git.checkout(target_branch).await {
            warn!(target = %target_branch, %error, "Cannot checkout target branch");
            return Vec::new();
        }

        let mut applied = Vec::new();
        for result in results {
            let Some(content) = &result.merged_content else {
                continue;
            };
            let path = self.git.repo_path().join(&result.file_path);
            if let Some(parent) = path.parent() {
                if let Err(error) = tokio::fs::create_dir_all(parent).await {
                    warn!(file = %result.file_path, %error, "Cannot create parent directory");
                    continue;
                }
            }
            if let Err(error) = tokio::fs::write(&path, content).await {
                warn!(file = %result.file_path, %error, "Failed to write merged content");
                continue;
            }
            if let Err(error) = self.git.stage(&result.file_path).await {
                warn!(file = %result.file_path, %error, "Failed to stage merged file");
                continue;
            }
            info!(file = %result.file_path, target = %target_branch, "Applied merge result");
            applied.push(result.clone());
        }
        applied
    }

    /// Prediction-driven recommendations for a branch set. Read-only: the
    /// prevention system is the component that acts on these.
    pub async fn prevent_conflicts_predictively(
        &self,
        branches: &[String],
    ) -> Result<Vec<PreventionRecommendation>> {
        let predictions = self.predictor.predict_conflicts(branches, None).await?;
        let threshold = AutoResolutionMode::Predictive.confidence_threshold();

        Ok(predictions
            .iter()
            .filter(|prediction| prediction.likelihood_score >= threshold)
            .map(|prediction| recommendation_for(prediction))
            .collect())
    }

    async fn record_session(&self, result: &AutoResolutionResult, conflicts: &[SemanticConflict]) {
        self.history.lock().await.push(result.clone());

        {
            let mut stats = self.stats.lock().unwrap();
            stats.total_sessions += 1;
            if result.outcome.is_success() {
                stats.successful_resolutions += 1;
            }
            if result.outcome == ResolutionOutcome::FullyResolved {
                stats.full_auto_resolutions += 1;
            }
            if result.outcome == ResolutionOutcome::EscalatedToHuman {
                stats.escalated_to_human += 1;
            }

            let sessions = stats.total_sessions as f64;
            stats.average_confidence =
                (stats.average_confidence * (sessions - 1.0) + result.confidence_score) / sessions;
            let preserved = if result.semantic_integrity_preserved { 1.0 } else { 0.0 };
            stats.semantic_integrity_rate =
                (stats.semantic_integrity_rate * (sessions - 1.0) + preserved) / sessions;
        }

        // Feed the per-(kind, severity) pattern tables.
        let record = PatternRecord {
            mode: result.mode,
            confidence: result.confidence_score,
        };
        if result.outcome.is_success() {
            let mut patterns = self.success_patterns.lock().unwrap();
            for conflict in conflicts {
                if !result.escalated_conflicts.contains(&conflict.id) {
                    patterns
                        .entry(pattern_key(conflict))
                        .or_default()
                        .push(record.clone());
                }
            }
        } else {
            let mut patterns = self.failure_patterns.lock().unwrap();
            for conflict in conflicts {
                patterns
                    .entry(pattern_key(conflict))
                    .or_default()
                    .push(record.clone());
            }
        }
    }

    pub fn get_resolution_stats(&self) -> AutoResolutionStats {
        self.stats.lock().unwrap().clone()
    }

    pub async fn recent_sessions(&self, limit: usize) -> Vec<AutoResolutionResult> {
        let history = self.history.lock().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Per-mode session counts and success rates.
    pub async fn mode_performance(&self) -> HashMap<&'static str, (u64, f64)> {
        let history = self.history.lock().await;
        let mut per_mode: HashMap<&'static str, (u64, u64)> = HashMap::new();
        for session in history.iter() {
            let entry = per_mode.entry(session.mode.slug()).or_default();
            entry.0 += 1;
            if session.outcome.is_success() {
                entry.1 += 1;
            }
        }
        per_mode
            .into_iter()
            .map(|(mode, (sessions, successes))| {
                (mode, (sessions, successes as f64 / sessions as f64))
            })
            .collect()
    }

    /// Heuristic advice derived from accumulated performance.
    pub fn performance_recommendations(&self) -> Vec<String> {
        let stats = self.stats.lock().unwrap();
        let mut recommendations = Vec::new();

        if stats.total_sessions > 10 {
            let success_rate = stats.successful_resolutions as f64 / stats.total_sessions as f64;
            if success_rate < 0.7 {
                recommendations.push(
                    "Consider a more conservative resolution mode to improve the success rate"
                        .to_string(),
                );
            }
            if stats.average_confidence < 0.6 {
                recommendations.push(
                    "Review conflict assessment criteria to improve confidence scores".to_string(),
                );
            }
            if stats.semantic_integrity_rate < 0.95 {
                recommendations
                    .push("Strengthen post-merge structural validation".to_string());
            }
        }

        let failures = self.failure_patterns.lock().unwrap();
        let mut frequent: Vec<(&String, usize)> = failures
            .iter()
            .map(|(pattern, records)| (pattern, records.len()))
            .collect();
        frequent.sort_by(|a, b| b.1.cmp(&a.1));
        for (pattern, count) in frequent.into_iter().take(3) {
            if count > 2 {
                recommendations.push(format!(
                    "Improve resolution strategy for {pattern} conflicts (failed {count} times)"
                ));
            }
        }

        recommendations
    }
}

fn pattern_key(conflict: &SemanticConflict) -> String {
    format!("{}_{}", conflict.kind.slug(), conflict.severity.slug())
}

fn mean_confidence(results: &[MergeResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|result| result.merge_confidence).sum::<f64>() / results.len() as f64
}

fn recommendation_for(prediction: &PredictionResult) -> PreventionRecommendation {
    let pattern = prediction.pattern.slug().to_string();
    PreventionRecommendation {
        prediction_id: prediction.id.clone(),
        automated: pattern.contains("import"),
        suggestions: prediction.prevention_suggestions.clone(),
        pattern,
    }
}

/// Risk score for a semantic conflict, clamped to [0, 1]. Replaceable
/// scoring policy.
pub(crate) fn conflict_risk(conflict: &SemanticConflict) -> f64 {
    let base: f64 = match conflict.severity {
        ConflictSeverity::Low => 0.2,
        ConflictSeverity::Medium => 0.5,
        ConflictSeverity::High => 0.8,
        ConflictSeverity::Critical => 1.0,
    };

    let mut adjustment = match conflict.kind {
        SemanticConflictKind::ImportSemanticConflict => -0.2,
        SemanticConflictKind::VariableTypeConflict => -0.1,
        SemanticConflictKind::FunctionSignatureChange => 0.1,
        SemanticConflictKind::ApiBreakingChange => 0.3,
        SemanticConflictKind::InheritanceConflict => 0.2,
        SemanticConflictKind::ClassInterfaceChange => 0.0,
    };

    if !conflict.is_public_symbol() {
        adjustment -= 0.1;
    }
    match conflict.suggested_resolution {
        ResolutionStrategy::HumanRequired => adjustment += 0.2,
        ResolutionStrategy::SemanticAnalysis => adjustment -= 0.1,
        _ => {}
    }

    (base + adjustment).clamp(0.0, 1.0)
}

/// Partition conflicts into (resolvable, escalated) under a mode policy.
pub(crate) fn partition_conflicts(
    conflicts: Vec<SemanticConflict>,
    mode: AutoResolutionMode,
) -> (Vec<SemanticConflict>, Vec<SemanticConflict>) {
    let mut resolvable = Vec::new();
    let mut escalated = Vec::new();

    for conflict in conflicts {
        let risk = conflict_risk(&conflict);
        let human_required =
            conflict.suggested_resolution == ResolutionStrategy::HumanRequired;

        let accepted = match mode {
            AutoResolutionMode::Conservative => {
                risk <= 0.3 && conflict.severity == ConflictSeverity::Low
            }
            AutoResolutionMode::Balanced => {
                risk <= 0.6
                    && matches!(
                        conflict.severity,
                        ConflictSeverity::Low | ConflictSeverity::Medium
                    )
                    && !human_required
            }
            AutoResolutionMode::Aggressive => {
                conflict.severity != ConflictSeverity::Critical && !human_required
            }
            AutoResolutionMode::Predictive => {
                risk <= 0.5 && conflict.severity != ConflictSeverity::Critical
            }
        };

        if accepted {
            resolvable.push(conflict);
        } else {
            escalated.push(conflict);
        }
    }

    (resolvable, escalated)
}

fn determine_outcome(
    total_conflicts: usize,
    escalated: usize,
    applied: usize,
) -> ResolutionOutcome {
    if total_conflicts == 0 || applied == total_conflicts {
        ResolutionOutcome::FullyResolved
    } else if applied > 0 {
        ResolutionOutcome::PartiallyResolved
    } else if escalated > 0 {
        ResolutionOutcome::EscalatedToHuman
    } else {
        ResolutionOutcome::ResolutionFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ImpactAnalysis;

    fn conflict(
        kind: SemanticConflictKind,
        severity: ConflictSeverity,
        symbol: &str,
        suggestion: ResolutionStrategy,
    ) -> SemanticConflict {
        SemanticConflict {
            id: format!("{}:{symbol}", kind.slug()),
            kind,
            severity,
            symbol_name: symbol.to_string(),
            file_path: "mod.py".to_string(),
            branch1: "a".to_string(),
            branch2: "b".to_string(),
            description: String::new(),
            old_definition: None,
            new_definition: None,
            impact: ImpactAnalysis::default(),
            suggested_resolution: suggestion,
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn risk_is_always_in_unit_interval() {
        for kind in [
            SemanticConflictKind::ImportSemanticConflict,
            SemanticConflictKind::ApiBreakingChange,
            SemanticConflictKind::InheritanceConflict,
        ] {
            for severity in ConflictSeverity::all() {
                let risk = conflict_risk(&conflict(
                    kind,
                    severity,
                    "_private",
                    ResolutionStrategy::HumanRequired,
                ));
                assert!((0.0..=1.0).contains(&risk));
            }
        }
    }

    #[test]
    fn conservative_mode_only_accepts_low_risk_low_severity() {
        let conflicts = vec![
            conflict(
                SemanticConflictKind::ImportSemanticConflict,
                ConflictSeverity::Low,
                "os",
                ResolutionStrategy::SemanticAnalysis,
            ),
            conflict(
                SemanticConflictKind::FunctionSignatureChange,
                ConflictSeverity::Medium,
                "handle",
                ResolutionStrategy::SemanticAnalysis,
            ),
        ];
        let (resolvable, escalated) =
            partition_conflicts(conflicts, AutoResolutionMode::Conservative);
        assert_eq!(resolvable.len(), 1);
        assert_eq!(escalated.len(), 1);
        assert_eq!(resolvable[0].kind, SemanticConflictKind::ImportSemanticConflict);
    }

    #[test]
    fn balanced_mode_rejects_human_required() {
        let conflicts = vec![conflict(
            SemanticConflictKind::ImportSemanticConflict,
            ConflictSeverity::Low,
            "os",
            ResolutionStrategy::HumanRequired,
        )];
        let (resolvable, escalated) = partition_conflicts(conflicts, AutoResolutionMode::Balanced);
        assert!(resolvable.is_empty());
        assert_eq!(escalated.len(), 1);
    }

    #[test]
    fn aggressive_mode_only_escalates_critical_and_human_required() {
        let conflicts = vec![
            conflict(
                SemanticConflictKind::ApiBreakingChange,
                ConflictSeverity::High,
                "api",
                ResolutionStrategy::SemanticAnalysis,
            ),
            conflict(
                SemanticConflictKind::ApiBreakingChange,
                ConflictSeverity::Critical,
                "core",
                ResolutionStrategy::SemanticAnalysis,
            ),
        ];
        let (resolvable, escalated) =
            partition_conflicts(conflicts, AutoResolutionMode::Aggressive);
        assert_eq!(resolvable.len(), 1);
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].severity, ConflictSeverity::Critical);
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(determine_outcome(0, 0, 0), ResolutionOutcome::FullyResolved);
        assert_eq!(determine_outcome(3, 0, 3), ResolutionOutcome::FullyResolved);
        assert_eq!(
            determine_outcome(3, 1, 1),
            ResolutionOutcome::PartiallyResolved
        );
        assert_eq!(
            determine_outcome(3, 3, 0),
            ResolutionOutcome::EscalatedToHuman
        );
        assert_eq!(
            determine_outcome(3, 0, 0),
            ResolutionOutcome::ResolutionFailed
        );
    }
}
