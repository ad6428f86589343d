use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaboration::{CollaborationEngine, MessagePriority, MessageType};
use crate::config::PreventionConfig;
use crate::error::Result;
use crate::git::BranchManager;
use crate::resolution::{AutoResolutionMode, AutoResolver};

use super::predictor::{
    ConflictPattern, ConflictPredictor, PredictionConfidence, PredictionResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreventionStrategy {
    BranchIsolation,
    WorkReallocation,
    DependencySync,
    EarlyMerge,
    AgentCoordination,
    TemporalSeparation,
    SemanticRefactoring,
}

impl PreventionStrategy {
    pub fn slug(self) -> &'static str {
        match self {
            PreventionStrategy::BranchIsolation => "branch_isolation",
            PreventionStrategy::WorkReallocation => "work_reallocation",
            PreventionStrategy::DependencySync => "dependency_sync",
            PreventionStrategy::EarlyMerge => "early_merge",
            PreventionStrategy::AgentCoordination => "agent_coordination",
            PreventionStrategy::TemporalSeparation => "temporal_separation",
            PreventionStrategy::SemanticRefactoring => "semantic_refactoring",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreventionAction {
    DeferTask,
    MergeEarly,
    NotifyAgents,
    CreateInterface,
    CoordinateTiming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreventionStatus {
    Pending,
    Applied,
    Failed,
    Cancelled,
}

/// A concrete mitigating action derived from a conflict prediction.
#[derive(Debug, Clone)]
pub struct PreventionMeasure {
    pub id: String,
    pub strategy: PreventionStrategy,
    pub action: PreventionAction,
    pub target_branches: Vec<String>,
    pub target_agents: Vec<String>,
    pub predicted_conflict_id: String,
    pub urgency: PredictionConfidence,
    pub description: String,
    pub implementation_steps: Vec<String>,
    pub estimated_effort_hours: u32,
    pub success_probability: f64,
    pub status: PreventionStatus,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Outcome of one prevention session.
#[derive(Debug, Clone)]
pub struct PreventionResult {
    pub session_id: String,
    pub branches_analyzed: Vec<String>,
    pub predictions_found: usize,
    pub measures_applied: usize,
    pub conflicts_prevented: usize,
    pub prevention_success_rate: f64,
    pub time_saved_hours: f64,
    pub applied_measures: Vec<PreventionMeasure>,
    pub failed_measures: Vec<PreventionMeasure>,
    pub prevention_time_secs: f64,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PreventionStats {
    pub predictions_analyzed: u64,
    pub measures_applied: u64,
    pub conflicts_prevented: u64,
    pub prevention_success_rate: f64,
    pub total_time_saved_hours: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PreventionSummary {
    pub stats: PreventionStats,
    pub active_measures: usize,
    pub sessions: usize,
    pub recent_prevention_rate: f64,
    pub monitoring: bool,
}

/// Converts predictions into proactive measures and applies them, either by
/// messaging agents through the collaboration engine or by driving an early
/// merge through the auto-resolver. A background loop repeats the analysis
/// over the active branch set.
pub struct ConflictPreventionSystem {
    predictor: Arc<ConflictPredictor>,
    resolver: Arc<AutoResolver>,
    collaboration: Arc<CollaborationEngine>,
    branches: Arc<BranchManager>,
    config: PreventionConfig,
    active_measures: Mutex<HashMap<String, PreventionMeasure>>,
    history: Mutex<Vec<PreventionResult>>,
    stats: std::sync::Mutex<PreventionStats>,
    running: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

const PREVENTION_SENDER: &str = "prevention_system";
/// Rough payoff heuristic: one avoided conflict saves about two hours.
const HOURS_SAVED_PER_CONFLICT: f64 = 2.0;

impl ConflictPreventionSystem {
    pub fn new(
        predictor: Arc<ConflictPredictor>,
        resolver: Arc<AutoResolver>,
        collaboration: Arc<CollaborationEngine>,
        branches: Arc<BranchManager>,
        config: PreventionConfig,
    ) -> Self {
        Self {
            predictor,
            resolver,
            collaboration,
            branches,
            config,
            active_measures: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            stats: std::sync::Mutex::new(PreventionStats::default()),
            running: AtomicBool::new(false),
            monitor: Mutex::new(None),
        }
    }

    /// Request predictions for the branch set, derive measures from the
    /// significant ones, and apply them up to the configured budget.
    pub async fn analyze_and_prevent_conflicts(
        &self,
        branches: &[String],
        time_horizon: Option<Duration>,
        agents: Option<Vec<String>>,
    ) -> Result<PreventionResult> {
        let started = Instant::now();
        let session_id = format!("prevention-{}", Uuid::new_v4());
        info!(session = %session_id, ?branches, "Starting conflict prevention analysis");

        let horizon = time_horizon.unwrap_or_else(|| Duration::hours(self.config.horizon_hours));
        let predictions = self.predictor.predict_conflicts(branches, Some(horizon)).await?;

        let significant: Vec<&PredictionResult> = predictions
            .iter()
            .filter(|prediction| prediction.likelihood_score >= self.config.prediction_threshold)
            .collect();
        info!(
            session = %session_id,
            significant = significant.len(),
            "Filtered significant predictions"
        );

        let mut measures = Vec::new();
        for prediction in &significant {
            measures.extend(self.generate_measures(prediction, agents.as_deref()));
        }
        measures.retain(|measure| measure.estimated_effort_hours <= self.config.effort_threshold_hours);

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for mut measure in measures.into_iter().take(self.config.max_measures) {
            let success = self.apply_measure(&measure).await;
            if success {
                measure.status = PreventionStatus::Applied;
                measure.applied_at = Some(Utc::now());
                self.active_measures
                    .lock()
                    .await
                    .insert(measure.id.clone(), measure.clone());
                applied.push(measure);
            } else {
                measure.status = PreventionStatus::Failed;
                failed.push(measure);
            }
        }

        let conflicts_prevented = applied.len();
        let attempted = applied.len() + failed.len();
        let success_rate = if attempted > 0 {
            applied.len() as f64 / attempted as f64
        } else {
            0.0
        };
        let time_saved = conflicts_prevented as f64 * HOURS_SAVED_PER_CONFLICT;

        {
            let mut stats = self.stats.lock().unwrap();
            stats.predictions_analyzed += predictions.len() as u64;
            stats.measures_applied += applied.len() as u64;
            stats.conflicts_prevented += conflicts_prevented as u64;
            stats.total_time_saved_hours += time_saved;
            if stats.measures_applied > 0 {
                stats.prevention_success_rate =
                    stats.conflicts_prevented as f64 / stats.measures_applied as f64;
            }
        }

        let result = PreventionResult {
            session_id: session_id.clone(),
            branches_analyzed: branches.to_vec(),
            predictions_found: predictions.len(),
            measures_applied: applied.len(),
            conflicts_prevented,
            prevention_success_rate: success_rate,
            time_saved_hours: time_saved,
            applied_measures: applied,
            failed_measures: failed,
            prevention_time_secs: started.elapsed().as_secs_f64(),
            executed_at: Utc::now(),
        };
        self.history.lock().await.push(result.clone());

        info!(
            session = %session_id,
            prevented = conflicts_prevented,
            "Prevention session completed"
        );
        Ok(result)
    }

    /// Map a prediction to measures via the pattern -> strategy table.
    fn generate_measures(
        &self,
        prediction: &PredictionResult,
        agents: Option<&[String]>,
    ) -> Vec<PreventionMeasure> {
        let targets = if prediction.affected_agents.is_empty() {
            agents.map(|list| list.to_vec()).unwrap_or_default()
        } else {
            prediction.affected_agents.clone()
        };

        let measure = |strategy: PreventionStrategy,
                       action: PreventionAction,
                       description: String,
                       steps: Vec<&str>,
                       effort: u32,
                       probability: f64| PreventionMeasure {
            id: format!("{}:{}", strategy.slug(), prediction.id),
            strategy,
            action,
            target_branches: prediction.affected_branches.clone(),
            target_agents: targets.clone(),
            predicted_conflict_id: prediction.id.clone(),
            urgency: prediction.confidence,
            description,
            implementation_steps: steps.into_iter().map(String::from).collect(),
            estimated_effort_hours: effort,
            success_probability: probability,
            status: PreventionStatus::Pending,
            applied_at: None,
        };

        match prediction.pattern {
            ConflictPattern::OverlappingImports => vec![measure(
                PreventionStrategy::DependencySync,
                PreventionAction::CoordinateTiming,
                "Synchronize dependency imports across branches".to_string(),
                vec![
                    "Identify conflicting imports",
                    "Agree on a shared import layout",
                    "Update all branches to the shared layout",
                ],
                3,
                0.8,
            )],
            ConflictPattern::FunctionSignatureDrift => vec![measure(
                PreventionStrategy::AgentCoordination,
                PreventionAction::NotifyAgents,
                "Coordinate agent work to prevent signature conflicts".to_string(),
                vec![
                    "Notify affected agents of the drifting signatures",
                    "Agree on the final signatures",
                    "Monitor adherence to the agreement",
                ],
                2,
                0.7,
            )],
            ConflictPattern::ApiBreakingChange => vec![measure(
                PreventionStrategy::SemanticRefactoring,
                PreventionAction::CreateInterface,
                "Create a stable interface to absorb API changes".to_string(),
                vec![
                    "Analyze current API usage",
                    "Design a backward-compatible interface",
                    "Migrate branches to the interface",
                ],
                6,
                0.9,
            )],
            ConflictPattern::ResourceContention => vec![measure(
                PreventionStrategy::TemporalSeparation,
                PreventionAction::DeferTask,
                "Separate conflicting work in time".to_string(),
                vec![
                    "Identify the contended files",
                    "Order the work by dependency",
                    "Schedule sequential execution",
                ],
                1,
                0.6,
            )],
            _ if prediction.likelihood_score >= self.config.early_merge_threshold => {
                vec![measure(
                    PreventionStrategy::EarlyMerge,
                    PreventionAction::MergeEarly,
                    "Merge branches early before the conflict escalates".to_string(),
                    vec![
                        "Verify branch readiness",
                        "Run automatic conflict resolution",
                        "Merge and notify affected agents",
                    ],
                    4,
                    0.8,
                )]
            }
            _ => Vec::new(),
        }
    }

    async fn apply_measure(&self, measure: &PreventionMeasure) -> bool {
        info!(measure = %measure.id, strategy = measure.strategy.slug(), "Applying prevention measure");
        match measure.strategy {
            PreventionStrategy::EarlyMerge => self.apply_early_merge(measure).await,
            PreventionStrategy::TemporalSeparation => {
                self.apply_temporal_separation(measure).await
            }
            PreventionStrategy::DependencySync => {
                self.notify_targets(
                    measure,
                    MessageType::DependencyChange,
                    "Dependency synchronization required",
                    false,
                )
                .await
            }
            PreventionStrategy::AgentCoordination => {
                self.notify_targets(
                    measure,
                    MessageType::ConflictAlert,
                    "Coordination required - conflict prevention",
                    true,
                )
                .await
            }
            PreventionStrategy::SemanticRefactoring => {
                self.notify_targets(
                    measure,
                    MessageType::StatusUpdate,
                    "Interface refactoring required",
                    false,
                )
                .await
            }
            PreventionStrategy::BranchIsolation | PreventionStrategy::WorkReallocation => {
                self.notify_targets(
                    measure,
                    MessageType::StatusUpdate,
                    "Work reallocation - conflict prevention",
                    false,
                )
                .await
            }
        }
    }

    /// Message every target agent, or broadcast when no specific targets
    /// are known.
    async fn notify_targets(
        &self,
        measure: &PreventionMeasure,
        message_type: MessageType,
        subject: &str,
        requires_ack: bool,
    ) -> bool {
        let content = json!({
            "measure_id": measure.id,
            "strategy": measure.strategy.slug(),
            "affected_branches": measure.target_branches,
            "implementation_steps": measure.implementation_steps,
            "reason": measure.description,
        });

        if measure.target_agents.is_empty() {
            self.collaboration
                .send_message(
                    PREVENTION_SENDER,
                    None,
                    message_type,
                    subject,
                    content,
                    MessagePriority::High,
                    None,
                    requires_ack,
                )
                .await;
            return true;
        }

        for agent in &measure.target_agents {
            self.collaboration
                .send_message(
                    PREVENTION_SENDER,
                    Some(agent),
                    message_type,
                    subject,
                    content.clone(),
                    MessagePriority::High,
                    None,
                    requires_ack,
                )
                .await;
        }
        true
    }

    /// Stagger the targeted agents in time.
    async fn apply_temporal_separation(&self, measure: &PreventionMeasure) -> bool {
        for (position, agent) in measure.target_agents.iter().enumerate() {
            let delay_hours = position as i64 * self.config.coordination_delay_hours;
            self.collaboration
                .send_message(
                    PREVENTION_SENDER,
                    Some(agent),
                    MessageType::StatusUpdate,
                    "Temporal coordination - delayed execution",
                    json!({
                        "measure_id": measure.id,
                        "delay_hours": delay_hours,
                        "execution_order": position + 1,
                        "total_agents": measure.target_agents.len(),
                        "reason": measure.description,
                    }),
                    MessagePriority::Normal,
                    None,
                    false,
                )
                .await;
        }
        true
    }

    async fn apply_early_merge(&self, measure: &PreventionMeasure) -> bool {
        if measure.target_branches.len() < 2 {
            return false;
        }
        let result = self
            .resolver
            .auto_resolve_branch_conflicts(
                &measure.target_branches[0],
                &measure.target_branches[1],
                None,
                Some(AutoResolutionMode::Predictive),
            )
            .await;
        result.outcome.is_success()
    }

    /// Start the continuous prevention monitor. Each tick polls the active
    /// branch set and runs a session when at least two branches exist.
    pub async fn start_monitoring(self: &Arc<Self>, interval: Option<StdDuration>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Prevention monitoring already running");
            return;
        }
        let interval =
            interval.unwrap_or_else(|| StdDuration::from_secs(self.config.monitor_interval_secs));
        info!(interval_secs = interval.as_secs(), "Started conflict prevention monitoring");

        let system = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while system.running.load(Ordering::SeqCst) {
                match system.branches.active_branch_names().await {
                    Ok(names) if names.len() >= 2 => {
                        match system.analyze_and_prevent_conflicts(&names, None, None).await {
                            Ok(result) if result.measures_applied > 0 => {
                                info!(
                                    measures = result.measures_applied,
                                    "Prevention monitor applied measures"
                                );
                            }
                            Ok(_) => {}
                            Err(error) => warn!(%error, "Prevention monitor session failed"),
                        }
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "Prevention monitor could not list branches"),
                }
                tokio::time::sleep(interval).await;
            }
        });
        *self.monitor.lock().await = Some(handle);
    }

    /// Stop the monitor: flip the running flag, cancel, and join.
    pub async fn stop_monitoring(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        info!("Stopped conflict prevention monitoring");
    }

    pub fn is_monitoring(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn get_prevention_summary(&self) -> PreventionSummary {
        let history = self.history.lock().await;
        let recent: Vec<&PreventionResult> = history.iter().rev().take(10).collect();
        let recent_prevention_rate = if recent.is_empty() {
            0.0
        } else {
            recent
                .iter()
                .map(|result| result.prevention_success_rate)
                .sum::<f64>()
                / recent.len() as f64
        };

        PreventionSummary {
            stats: self.stats.lock().unwrap().clone(),
            active_measures: self.active_measures.lock().await.len(),
            sessions: history.len(),
            recent_prevention_rate,
            monitoring: self.running.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{PythonParser, SemanticAnalyzer};
    use crate::collaboration::FixedDirectory;
    use crate::config::{
        AnalysisConfig, CollaborationConfig, MergeConfig, PredictionConfig,
    };
    use crate::git::GitClient;
    use crate::resolution::{
        ConflictResolutionEngine, ConflictSeverity, ConflictType, SemanticMerger,
    };

    fn system() -> ConflictPreventionSystem {
        let git = GitClient::new(".");
        let analyzer = Arc::new(SemanticAnalyzer::new(
            git.clone(),
            Arc::new(PythonParser::with_fallback()),
            AnalysisConfig::default(),
        ));
        let predictor = Arc::new(ConflictPredictor::new(
            git.clone(),
            Arc::clone(&analyzer),
            PredictionConfig::default(),
        ));
        let merger = Arc::new(SemanticMerger::new(
            Arc::clone(&analyzer),
            git.clone(),
            MergeConfig::default(),
        ));
        let engine = Arc::new(ConflictResolutionEngine::new(git.clone()));
        let resolver = Arc::new(AutoResolver::new(
            analyzer,
            merger,
            engine,
            Arc::clone(&predictor),
            git.clone(),
        ));
        let collaboration = Arc::new(CollaborationEngine::new(
            Arc::new(FixedDirectory::new(["agent-1", "agent-2"])),
            CollaborationConfig::default(),
        ));
        let branches = Arc::new(BranchManager::new(git, "feat/agents", ".polymerge-test"));
        ConflictPreventionSystem::new(
            predictor,
            resolver,
            collaboration,
            branches,
            PreventionConfig::default(),
        )
    }

    fn prediction(pattern: ConflictPattern, likelihood: f64) -> PredictionResult {
        PredictionResult {
            id: format!("{}:a:b", pattern.slug()),
            confidence: PredictionConfidence::from_likelihood(likelihood),
            pattern,
            affected_branches: vec!["a".to_string(), "b".to_string()],
            affected_files: Vec::new(),
            affected_agents: vec!["agent-1".to_string()],
            predicted_conflict_type: ConflictType::MergeConflict,
            predicted_severity: ConflictSeverity::Medium,
            likelihood_score: likelihood,
            description: String::new(),
            prevention_suggestions: Vec::new(),
            timeline: None,
            predicted_at: Utc::now(),
        }
    }

    #[test]
    fn pattern_table_maps_to_expected_strategies() {
        let system = system();
        let cases = [
            (ConflictPattern::OverlappingImports, PreventionStrategy::DependencySync),
            (
                ConflictPattern::FunctionSignatureDrift,
                PreventionStrategy::AgentCoordination,
            ),
            (
                ConflictPattern::ApiBreakingChange,
                PreventionStrategy::SemanticRefactoring,
            ),
            (
                ConflictPattern::ResourceContention,
                PreventionStrategy::TemporalSeparation,
            ),
        ];
        for (pattern, expected) in cases {
            let measures = system.generate_measures(&prediction(pattern, 0.7), None);
            assert_eq!(measures.len(), 1, "{pattern:?}");
            assert_eq!(measures[0].strategy, expected);
        }
    }

    #[test]
    fn unmatched_patterns_fall_back_to_early_merge_only_when_likely() {
        let system = system();
        let high = system.generate_measures(
            &prediction(ConflictPattern::MergeContextLoss, 0.85),
            None,
        );
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].strategy, PreventionStrategy::EarlyMerge);

        let low = system.generate_measures(
            &prediction(ConflictPattern::MergeContextLoss, 0.65),
            None,
        );
        assert!(low.is_empty());
    }

    #[test]
    fn measures_respect_the_effort_budget() {
        let system = system();
        let measures =
            system.generate_measures(&prediction(ConflictPattern::ApiBreakingChange, 0.9), None);
        assert!(measures
            .iter()
            .all(|measure| measure.estimated_effort_hours <= 8));
    }
}
