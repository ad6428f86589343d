use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analysis::SemanticAnalyzer;
use crate::config::PredictionConfig;
use crate::error::Result;
use crate::git::GitClient;
use crate::resolution::{ConflictSeverity, ConflictType};

const SIMILARITY_THRESHOLD: f64 = 0.8;
const IMPORT_OVERLAP_THRESHOLD: usize = 5;
const IMPORT_DIFFERENCE_THRESHOLD: usize = 3;
const DRIFTED_FUNCTIONS_HIGH: usize = 5;

/// Confidence band derived from a continuous likelihood score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionConfidence {
    Low,
    Medium,
    High,
    Critical,
}

impl PredictionConfidence {
    pub fn slug(self) -> &'static str {
        match self {
            PredictionConfidence::Low => "low",
            PredictionConfidence::Medium => "medium",
            PredictionConfidence::High => "high",
            PredictionConfidence::Critical => "critical",
        }
    }

    /// Band boundaries: >= 0.9 critical, >= 0.7 high, >= 0.4 medium.
    pub fn from_likelihood(likelihood: f64) -> Self {
        if likelihood >= 0.9 {
            PredictionConfidence::Critical
        } else if likelihood >= 0.7 {
            PredictionConfidence::High
        } else if likelihood >= 0.4 {
            PredictionConfidence::Medium
        } else {
            PredictionConfidence::Low
        }
    }
}

/// The eight conflict patterns the predictor recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictPattern {
    OverlappingImports,
    FunctionSignatureDrift,
    VariableNamingCollision,
    ClassHierarchyChange,
    DependencyVersionMismatch,
    ApiBreakingChange,
    ResourceContention,
    MergeContextLoss,
}

impl ConflictPattern {
    pub fn slug(self) -> &'static str {
        match self {
            ConflictPattern::OverlappingImports => "overlapping_imports",
            ConflictPattern::FunctionSignatureDrift => "function_signature_drift",
            ConflictPattern::VariableNamingCollision => "variable_naming_collision",
            ConflictPattern::ClassHierarchyChange => "class_hierarchy_change",
            ConflictPattern::DependencyVersionMismatch => "dependency_version_mismatch",
            ConflictPattern::ApiBreakingChange => "api_breaking_change",
            ConflictPattern::ResourceContention => "resource_contention",
            ConflictPattern::MergeContextLoss => "merge_context_loss",
        }
    }
}

/// Multi-dimensional conflict probability vector for a branch pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConflictVector {
    pub file_overlap: f64,
    pub change_frequency: f64,
    pub complexity: f64,
    pub dependency_coupling: f64,
    pub semantic_distance: f64,
    pub temporal_proximity: f64,
}

/// One conflict forecast.
#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub id: String,
    pub confidence: PredictionConfidence,
    pub pattern: ConflictPattern,
    pub affected_branches: Vec<String>,
    pub affected_files: Vec<String>,
    pub affected_agents: Vec<String>,
    pub predicted_conflict_type: ConflictType,
    pub predicted_severity: ConflictSeverity,
    pub likelihood_score: f64,
    pub description: String,
    pub prevention_suggestions: Vec<String>,
    pub timeline: Option<DateTime<Utc>>,
    pub predicted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PredictionStats {
    pub total_predictions: u64,
    pub accurate_predictions: u64,
    pub false_positives: u64,
    pub accuracy_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PredictionSummary {
    pub total_predictions: usize,
    pub by_confidence: HashMap<&'static str, usize>,
    pub by_pattern: HashMap<&'static str, usize>,
    pub stats: PredictionStats,
    pub most_likely: Vec<(String, f64, &'static str)>,
}

/// Pattern analysis payload for consumers.
#[derive(Debug, Clone, Default)]
pub struct PatternAnalysis {
    pub frequent_conflict_files: Vec<(String, usize)>,
    pub hotspots: Vec<(String, &'static str, u32)>,
    pub pattern_distribution: HashMap<&'static str, usize>,
    pub daily_trend: BTreeMap<String, usize>,
    pub total_predictions: usize,
    pub average_likelihood: f64,
}

/// Forecasts conflicts between branch pairs before they materialize.
///
/// Each unordered pair gets a 6-dimensional vector; eight independent
/// pattern detectors each yield at most one prediction per pair. A learning
/// pass rescales likelihoods by the historical accuracy of each pattern.
pub struct ConflictPredictor {
    git: GitClient,
    analyzer: Arc<SemanticAnalyzer>,
    config: PredictionConfig,
    predictions: Mutex<HashMap<String, PredictionResult>>,
    history: Mutex<Vec<PredictionResult>>,
    vectors: std::sync::Mutex<HashMap<String, ConflictVector>>,
    pattern_accuracy: std::sync::Mutex<HashMap<&'static str, Vec<bool>>>,
    stats: std::sync::Mutex<PredictionStats>,
}

impl ConflictPredictor {
    pub fn new(git: GitClient, analyzer: Arc<SemanticAnalyzer>, config: PredictionConfig) -> Self {
        Self {
            git,
            analyzer,
            config,
            predictions: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            vectors: std::sync::Mutex::new(HashMap::new()),
            pattern_accuracy: std::sync::Mutex::new(HashMap::new()),
            stats: std::sync::Mutex::new(PredictionStats::default()),
        }
    }

    /// Predict conflicts across every unordered branch pair, ranked by
    /// likelihood. Only predictions at or above the configured floor
    /// survive, capped at the configured maximum.
    pub async fn predict_conflicts(
        &self,
        branches: &[String],
        _time_horizon: Option<Duration>,
    ) -> Result<Vec<PredictionResult>> {
        info!(?branches, "Predicting conflicts");
        let mut predictions = Vec::new();

        for (index, branch1) in branches.iter().enumerate() {
            for branch2 in &branches[index + 1..] {
                let vector = match self.compute_conflict_vector(branch1, branch2).await {
                    Ok(vector) => vector,
                    Err(error) => {
                        warn!(branch1 = %branch1, branch2 = %branch2, %error, "Vector computation failed");
                        ConflictVector::default()
                    }
                };
                self.vectors
                    .lock()
                    .unwrap()
                    .insert(format!("{branch1}:{branch2}"), vector);

                predictions.extend(self.run_detectors(branch1, branch2, &vector).await);
            }
        }

        // Learning pass: rescale by the historical accuracy of the pattern.
        {
            let accuracy_table = self.pattern_accuracy.lock().unwrap();
            for prediction in &mut predictions {
                if let Some(records) = accuracy_table.get(prediction.pattern.slug()) {
                    if !records.is_empty() {
                        let accurate = records.iter().filter(|hit| **hit).count() as f64;
                        let accuracy = accurate / records.len() as f64;
                        prediction.likelihood_score =
                            (prediction.likelihood_score * (0.5 + 0.5 * accuracy)).clamp(0.0, 1.0);
                        prediction.confidence =
                            PredictionConfidence::from_likelihood(prediction.likelihood_score);
                    }
                }
            }
        }

        predictions.retain(|prediction| prediction.likelihood_score >= self.config.min_confidence);
        predictions.sort_by(|a, b| {
            b.likelihood_score
                .partial_cmp(&a.likelihood_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        predictions.truncate(self.config.max_predictions);

        {
            let mut stored = self.predictions.lock().await;
            let mut history = self.history.lock().await;
            for prediction in &predictions {
                stored.insert(prediction.id.clone(), prediction.clone());
                history.push(prediction.clone());
            }
        }
        self.stats.lock().unwrap().total_predictions += predictions.len() as u64;

        info!(count = predictions.len(), "Generated conflict predictions");
        Ok(predictions)
    }

    async fn run_detectors(
        &self,
        branch1: &str,
        branch2: &str,
        vector: &ConflictVector,
    ) -> Vec<PredictionResult> {
        let mut results = Vec::new();
        let detectors: [Option<PredictionResult>; 8] = [
            self.detect_overlapping_imports(branch1, branch2, vector).await,
            self.detect_signature_drift(branch1, branch2, vector).await,
            self.detect_naming_collisions(branch1, branch2, vector).await,
            self.detect_hierarchy_changes(branch1, branch2, vector).await,
            self.detect_version_conflicts(branch1, branch2, vector).await,
            self.detect_api_changes(branch1, branch2, vector).await,
            self.detect_resource_contention(branch1, branch2, vector),
            self.detect_context_loss(branch1, branch2, vector),
        ];
        for detection in detectors {
            if let Some(prediction) = detection {
                debug!(
                    pattern = prediction.pattern.slug(),
                    likelihood = prediction.likelihood_score,
                    "Pattern detected"
                );
                results.push(prediction);
            }
        }
        results
    }

    async fn compute_conflict_vector(
        &self,
        branch1: &str,
        branch2: &str,
    ) -> Result<ConflictVector> {
        let files1 = self.git.changed_files(branch1).await?;
        let files2 = self.git.changed_files(branch2).await?;

        let common = files1.keys().filter(|path| files2.contains_key(*path)).count();
        let union = files1.len() + files2.len() - common;
        let file_overlap = common as f64 / union.max(1) as f64;

        let window_days = self.config.window_days.max(1);
        let since = format!("{window_days} days ago");
        let freq1 =
            self.git.commit_count_since(branch1, &since).await? as f64 / window_days as f64;
        let freq2 =
            self.git.commit_count_since(branch2, &since).await? as f64 / window_days as f64;
        let change_frequency = (freq1 * freq2 / 100.0).min(1.0);

        let complexity1 = (self.git.lines_changed(branch1).await? as f64 / 10.0).min(100.0);
        let complexity2 = (self.git.lines_changed(branch2).await? as f64 / 10.0).min(100.0);
        let complexity = (complexity1 + complexity2) / 200.0;

        let modules1 = self.import_modules(branch1).await;
        let modules2 = self.import_modules(branch2).await;
        let dependency_coupling = jaccard(&modules1, &modules2);

        let signatures1 = self.all_function_signatures(branch1).await;
        let signatures2 = self.all_function_signatures(branch2).await;
        let shared: Vec<&String> = signatures1
            .keys()
            .filter(|key| signatures2.contains_key(*key))
            .collect();
        let semantic_distance = if shared.is_empty() {
            0.0
        } else {
            let drifted = shared
                .iter()
                .filter(|key| signatures1[**key] != signatures2[**key])
                .count();
            drifted as f64 / shared.len() as f64
        };

        let temporal_proximity = match (
            self.git.last_commit_timestamp(branch1).await?,
            self.git.last_commit_timestamp(branch2).await?,
        ) {
            (Some(time1), Some(time2)) => {
                let gap_hours = (time1 - time2).abs() as f64 / 3600.0;
                1.0 / (1.0 + gap_hours / 24.0)
            }
            _ => 0.0,
        };

        Ok(ConflictVector {
            file_overlap,
            change_frequency,
            complexity,
            dependency_coupling,
            semantic_distance,
            temporal_proximity,
        })
    }

    async fn detect_overlapping_imports(
        &self,
        branch1: &str,
        branch2: &str,
        vector: &ConflictVector,
    ) -> Option<PredictionResult> {
        let files1 = self.files_with_imports(branch1).await;
        let files2 = self.files_with_imports(branch2).await;

        let mut affected_files = Vec::new();
        for (file_path, imports1) in &files1 {
            let Some(imports2) = files2.get(file_path) else {
                continue;
            };
            if imports_likely_to_conflict(imports1, imports2) {
                affected_files.push(file_path.clone());
            }
        }
        if affected_files.is_empty() {
            return None;
        }

        let likelihood = import_conflict_likelihood(affected_files.len(), vector);
        Some(self.prediction(
            ConflictPattern::OverlappingImports,
            branch1,
            branch2,
            affected_files.clone(),
            ConflictType::MergeConflict,
            ConflictSeverity::Low,
            likelihood,
            format!(
                "Import conflicts predicted in {} files between {branch1} and {branch2}",
                affected_files.len()
            ),
            vec![
                "Use consistent import ordering across branches".to_string(),
                "Coordinate import additions through team communication".to_string(),
                "Consider automated import sorting tooling".to_string(),
            ],
            Duration::days(2),
        ))
    }

    async fn detect_signature_drift(
        &self,
        branch1: &str,
        branch2: &str,
        vector: &ConflictVector,
    ) -> Option<PredictionResult> {
        let signatures1 = self.all_function_signatures(branch1).await;
        let signatures2 = self.all_function_signatures(branch2).await;

        let shared: Vec<&String> = signatures1
            .keys()
            .filter(|key| signatures2.contains_key(*key))
            .collect();
        if shared.is_empty() {
            return None;
        }

        let mut drift = 0.0;
        let mut affected = Vec::new();
        for key in &shared {
            let sig1 = &signatures1[*key];
            let sig2 = &signatures2[*key];
            if sig1 != sig2 {
                let score = similarity(sig1, sig2);
                if score < SIMILARITY_THRESHOLD {
                    affected.push((**key).clone());
                    drift += 1.0 - score;
                }
            }
        }
        if affected.is_empty() {
            return None;
        }

        let likelihood =
            ((drift / shared.len() as f64) + vector.semantic_distance * 0.3).clamp(0.0, 1.0);
        let severity = if affected.len() > DRIFTED_FUNCTIONS_HIGH {
            ConflictSeverity::High
        } else {
            ConflictSeverity::Medium
        };
        let affected_files: BTreeSet<String> = affected
            .iter()
            .filter_map(|key| key.split(':').next().map(|file| file.to_string()))
            .collect();

        Some(self.prediction(
            ConflictPattern::FunctionSignatureDrift,
            branch1,
            branch2,
            affected_files.into_iter().collect(),
            ConflictType::Semantic,
            severity,
            likelihood,
            format!("Function signature drift detected in {} functions", affected.len()),
            vec![
                "Coordinate API changes through design reviews".to_string(),
                "Use versioned APIs during development".to_string(),
                "Add automated signature compatibility checks".to_string(),
            ],
            Duration::days(1),
        ))
    }

    async fn detect_naming_collisions(
        &self,
        branch1: &str,
        branch2: &str,
        vector: &ConflictVector,
    ) -> Option<PredictionResult> {
        let symbols1 = self.symbol_definitions(branch1).await;
        let symbols2 = self.symbol_definitions(branch2).await;

        let collisions: Vec<&String> = symbols1
            .iter()
            .filter(|(name, definition)| {
                symbols2
                    .get(*name)
                    .map(|other| other != *definition)
                    .unwrap_or(false)
            })
            .map(|(name, _)| name)
            .collect();
        if collisions.is_empty() {
            return None;
        }

        let likelihood =
            (0.1 * collisions.len() as f64 + vector.complexity * 0.2).clamp(0.0, 1.0);
        Some(self.prediction(
            ConflictPattern::VariableNamingCollision,
            branch1,
            branch2,
            Vec::new(),
            ConflictType::Semantic,
            ConflictSeverity::Medium,
            likelihood,
            format!("Naming collisions predicted for {} symbols", collisions.len()),
            vec![
                "Use consistent naming conventions across agents".to_string(),
                "Prefix new symbols with a module namespace".to_string(),
            ],
            Duration::days(3),
        ))
    }

    async fn detect_hierarchy_changes(
        &self,
        branch1: &str,
        branch2: &str,
        _vector: &ConflictVector,
    ) -> Option<PredictionResult> {
        let hierarchies1 = self.class_hierarchies(branch1).await;
        let hierarchies2 = self.class_hierarchies(branch2).await;

        let mut score = 0.0;
        let mut affected = Vec::new();
        for (class_name, bases1) in &hierarchies1 {
            let Some(bases2) = hierarchies2.get(class_name) else {
                continue;
            };
            if bases1 != bases2 {
                affected.push(class_name.clone());
                let depth = bases1.len().max(bases2.len()) as f64 / 10.0;
                score += 0.2 + depth;
            }
        }
        if affected.is_empty() {
            return None;
        }

        Some(self.prediction(
            ConflictPattern::ClassHierarchyChange,
            branch1,
            branch2,
            Vec::new(),
            ConflictType::Semantic,
            ConflictSeverity::High,
            score.clamp(0.0, 1.0),
            format!("Class hierarchy conflicts predicted for {} classes", affected.len()),
            vec![
                "Coordinate inheritance changes through architecture reviews".to_string(),
                "Prefer composition over inheritance where possible".to_string(),
            ],
            Duration::days(1),
        ))
    }

    async fn detect_version_conflicts(
        &self,
        branch1: &str,
        branch2: &str,
        _vector: &ConflictVector,
    ) -> Option<PredictionResult> {
        let versions1 = self.dependency_versions(branch1).await;
        let versions2 = self.dependency_versions(branch2).await;

        let common: Vec<&String> = versions1
            .keys()
            .filter(|package| versions2.contains_key(*package))
            .collect();
        if common.is_empty() {
            return None;
        }

        let mut score = 0.0;
        let mut mismatches = 0usize;
        for package in &common {
            let version1 = &versions1[*package];
            let version2 = &versions2[*package];
            if version1 != version2 {
                mismatches += 1;
                score += version_distance(version1, version2);
            }
        }
        if mismatches == 0 {
            return None;
        }

        Some(self.prediction(
            ConflictPattern::DependencyVersionMismatch,
            branch1,
            branch2,
            vec![
                "requirements.txt".to_string(),
                "pyproject.toml".to_string(),
            ],
            ConflictType::Dependency,
            ConflictSeverity::Medium,
            (score / common.len() as f64).clamp(0.0, 1.0),
            format!("Dependency version conflicts predicted for {mismatches} packages"),
            vec![
                "Pin dependency versions in one place".to_string(),
                "Coordinate major version upgrades".to_string(),
            ],
            Duration::hours(12),
        ))
    }

    async fn detect_api_changes(
        &self,
        branch1: &str,
        branch2: &str,
        vector: &ConflictVector,
    ) -> Option<PredictionResult> {
        let signatures1 = self.all_function_signatures(branch1).await;
        let signatures2 = self.all_function_signatures(branch2).await;

        // Public symbols present on one side of a shared file but not the
        // other read as deletions from the caller's perspective.
        let shared_files: BTreeSet<&str> = signatures1
            .keys()
            .filter_map(|key| key.split(':').next())
            .filter(|file| {
                signatures2
                    .keys()
                    .any(|key| key.split(':').next() == Some(*file))
            })
            .collect();

        let mut breaking = 0usize;
        for (key, _) in signatures1.iter() {
            let Some((file, name)) = key.split_once(':') else {
                continue;
            };
            if shared_files.contains(file) && !name.starts_with('_') && !signatures2.contains_key(key)
            {
                breaking += 1;
            }
        }
        if breaking == 0 {
            return None;
        }

        let likelihood = (0.25 * breaking as f64 + vector.file_overlap * 0.2).clamp(0.0, 1.0);
        Some(self.prediction(
            ConflictPattern::ApiBreakingChange,
            branch1,
            branch2,
            shared_files.into_iter().map(|file| file.to_string()).collect(),
            ConflictType::Semantic,
            ConflictSeverity::High,
            likelihood,
            format!("API breaking changes predicted: {breaking} public symbols removed"),
            vec![
                "Keep deprecated signatures alive for one release".to_string(),
                "Announce removals to all agents before merging".to_string(),
            ],
            Duration::days(1),
        ))
    }

    fn detect_resource_contention(
        &self,
        branch1: &str,
        branch2: &str,
        vector: &ConflictVector,
    ) -> Option<PredictionResult> {
        // Both branches hammering the same files at the same time.
        if vector.file_overlap <= 0.0 || vector.temporal_proximity < 0.5 {
            return None;
        }

        let likelihood =
            (vector.file_overlap * 0.5 + vector.temporal_proximity * 0.5).clamp(0.0, 1.0);
        Some(self.prediction(
            ConflictPattern::ResourceContention,
            branch1,
            branch2,
            Vec::new(),
            ConflictType::FileModification,
            ConflictSeverity::Medium,
            likelihood,
            format!("Resource contention predicted between {branch1} and {branch2}"),
            vec![
                "Stagger work on the shared files".to_string(),
                "Split the contended files along module boundaries".to_string(),
            ],
            Duration::hours(12),
        ))
    }

    fn detect_context_loss(
        &self,
        branch1: &str,
        branch2: &str,
        vector: &ConflictVector,
    ) -> Option<PredictionResult> {
        // Large overlapping diffs lose reviewer context fast.
        if vector.file_overlap <= 0.0 || vector.complexity <= 0.0 {
            return None;
        }
        let likelihood = (vector.file_overlap * vector.complexity).sqrt().clamp(0.0, 1.0);
        if likelihood < 0.1 {
            return None;
        }

        Some(self.prediction(
            ConflictPattern::MergeContextLoss,
            branch1,
            branch2,
            Vec::new(),
            ConflictType::MergeConflict,
            ConflictSeverity::High,
            likelihood,
            format!("Merge context loss predicted between {branch1} and {branch2}"),
            vec![
                "Merge early and often while the diff is small".to_string(),
                "Break the work into smaller reviewable slices".to_string(),
            ],
            Duration::days(2),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn prediction(
        &self,
        pattern: ConflictPattern,
        branch1: &str,
        branch2: &str,
        affected_files: Vec<String>,
        conflict_type: ConflictType,
        severity: ConflictSeverity,
        likelihood: f64,
        description: String,
        suggestions: Vec<String>,
        horizon: Duration,
    ) -> PredictionResult {
        let likelihood = likelihood.clamp(0.0, 1.0);
        PredictionResult {
            id: format!("{}:{branch1}:{branch2}", pattern.slug()),
            confidence: PredictionConfidence::from_likelihood(likelihood),
            pattern,
            affected_branches: vec![branch1.to_string(), branch2.to_string()],
            affected_files,
            affected_agents: Vec::new(),
            predicted_conflict_type: conflict_type,
            predicted_severity: severity,
            likelihood_score: likelihood,
            description,
            prevention_suggestions: suggestions,
            timeline: Some(Utc::now() + horizon),
            predicted_at: Utc::now(),
        }
    }

    // Branch introspection helpers; failures degrade to empty maps.

    async fn files_with_imports(&self, branch: &str) -> HashMap<String, Vec<String>> {
        let mut files = HashMap::new();
        let Ok(changed) = self.git.changed_files(branch).await else {
            return files;
        };
        for file_path in changed.keys().filter(|path| self.analyzer.parser().handles(path)) {
            if let Ok(Some(context)) = self.analyzer.context_for(branch, file_path).await {
                if !context.imports.is_empty() {
                    files.insert(
                        file_path.clone(),
                        context.imports.iter().map(|import| import.render()).collect(),
                    );
                }
            }
        }
        files
    }

    async fn import_modules(&self, branch: &str) -> BTreeSet<String> {
        let mut modules = BTreeSet::new();
        for imports in self.files_with_imports(branch).await.values() {
            for statement in imports {
                if let Some(module) = statement.split_whitespace().nth(1) {
                    modules.insert(module.to_string());
                }
            }
        }
        modules
    }

    async fn all_function_signatures(&self, branch: &str) -> BTreeMap<String, String> {
        let mut signatures = BTreeMap::new();
        let Ok(changed) = self.git.changed_files(branch).await else {
            return signatures;
        };
        for file_path in changed.keys().filter(|path| self.analyzer.parser().handles(path)) {
            if let Ok(Some(context)) = self.analyzer.context_for(branch, file_path).await {
                for (name, signature) in &context.functions {
                    signatures.insert(format!("{file_path}:{name}"), signature.render());
                }
            }
        }
        signatures
    }

    async fn symbol_definitions(&self, branch: &str) -> BTreeMap<String, String> {
        let mut symbols = BTreeMap::new();
        let Ok(changed) = self.git.changed_files(branch).await else {
            return symbols;
        };
        for file_path in changed.keys().filter(|path| self.analyzer.parser().handles(path)) {
            if let Ok(Some(context)) = self.analyzer.context_for(branch, file_path).await {
                for (name, signature) in &context.functions {
                    symbols.insert(name.clone(), signature.render());
                }
                for (name, class) in &context.classes {
                    symbols.insert(name.clone(), format!("class {}({})", name, class.bases.join(", ")));
                }
            }
        }
        symbols
    }

    async fn class_hierarchies(&self, branch: &str) -> BTreeMap<String, Vec<String>> {
        let mut hierarchies = BTreeMap::new();
        let Ok(changed) = self.git.changed_files(branch).await else {
            return hierarchies;
        };
        for file_path in changed.keys().filter(|path| self.analyzer.parser().handles(path)) {
            if let Ok(Some(context)) = self.analyzer.context_for(branch, file_path).await {
                for (name, class) in &context.classes {
                    hierarchies.insert(name.clone(), class.bases.clone());
                }
            }
        }
        hierarchies
    }

    async fn dependency_versions(&self, branch: &str) -> BTreeMap<String, String> {
        let mut versions = BTreeMap::new();

        if let Ok(Some(requirements)) = self.git.file_content(branch, "requirements.txt").await {
            for line in requirements.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((package, version)) = line.split_once("==") {
                    versions.insert(package.trim().to_string(), version.trim().to_string());
                }
            }
        }

        if let Ok(Some(pyproject)) = self.git.file_content(branch, "pyproject.toml").await {
            let mut in_dependencies = false;
            for line in pyproject.lines() {
                let line = line.trim();
                if line == "[dependencies]" || line.contains("dependencies = [") {
                    in_dependencies = true;
                } else if line.starts_with('[') {
                    in_dependencies = false;
                } else if in_dependencies && line.contains('=') && line.contains('"') {
                    if let Some((package, version)) = line.split_once('=') {
                        let package = package.trim().trim_matches(|c| c == '"' || c == '\'' || c == ',');
                        let version = version.trim().trim_matches(|c| c == '"' || c == '\'' || c == ',');
                        if !package.is_empty() && !version.is_empty() {
                            versions.insert(package.to_string(), version.to_string());
                        }
                    }
                }
            }
        }

        versions
    }

    /// Record whether a prediction turned out accurate; feeds the learning
    /// rescale for that pattern.
    pub async fn record_prediction_outcome(&self, prediction_id: &str, accurate: bool) {
        let pattern = {
            self.predictions
                .lock()
                .await
                .get(prediction_id)
                .map(|prediction| prediction.pattern)
        };
        let Some(pattern) = pattern else {
            return;
        };

        self.pattern_accuracy
            .lock()
            .unwrap()
            .entry(pattern.slug())
            .or_default()
            .push(accurate);

        let mut stats = self.stats.lock().unwrap();
        if accurate {
            stats.accurate_predictions += 1;
        } else {
            stats.false_positives += 1;
        }
        let graded = stats.accurate_predictions + stats.false_positives;
        stats.accuracy_rate = stats.accurate_predictions as f64 / graded.max(1) as f64;
    }

    pub async fn get_prediction_summary(&self) -> PredictionSummary {
        let predictions = self.predictions.lock().await;

        let mut by_confidence: HashMap<&'static str, usize> = HashMap::new();
        let mut by_pattern: HashMap<&'static str, usize> = HashMap::new();
        for prediction in predictions.values() {
            *by_confidence.entry(prediction.confidence.slug()).or_default() += 1;
            *by_pattern.entry(prediction.pattern.slug()).or_default() += 1;
        }

        let mut ranked: Vec<&PredictionResult> = predictions.values().collect();
        ranked.sort_by(|a, b| {
            b.likelihood_score
                .partial_cmp(&a.likelihood_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        PredictionSummary {
            total_predictions: predictions.len(),
            by_confidence,
            by_pattern,
            stats: self.stats.lock().unwrap().clone(),
            most_likely: ranked
                .into_iter()
                .take(5)
                .map(|prediction| {
                    (
                        prediction.id.clone(),
                        prediction.likelihood_score,
                        prediction.pattern.slug(),
                    )
                })
                .collect(),
        }
    }

    /// Detailed trend analysis over the stored predictions.
    pub async fn analyze_conflict_patterns(&self) -> PatternAnalysis {
        let predictions = self.predictions.lock().await;
        if predictions.is_empty() {
            return PatternAnalysis::default();
        }

        let mut file_counts: HashMap<String, usize> = HashMap::new();
        let mut branch_scores: HashMap<String, u32> = HashMap::new();
        let mut pattern_distribution: HashMap<&'static str, usize> = HashMap::new();
        let mut daily_trend: BTreeMap<String, usize> = BTreeMap::new();

        for prediction in predictions.values() {
            for file_path in &prediction.affected_files {
                *file_counts.entry(file_path.clone()).or_default() += 1;
            }
            for branch in &prediction.affected_branches {
                *branch_scores.entry(branch.clone()).or_default() +=
                    (prediction.likelihood_score * 10.0) as u32;
            }
            *pattern_distribution.entry(prediction.pattern.slug()).or_default() += 1;
            *daily_trend
                .entry(prediction.predicted_at.format("%Y-%m-%d").to_string())
                .or_default() += 1;
        }

        let mut frequent_conflict_files: Vec<(String, usize)> = file_counts.into_iter().collect();
        frequent_conflict_files.sort_by(|a, b| b.1.cmp(&a.1));
        frequent_conflict_files.truncate(10);

        let mut hotspots: Vec<(String, &'static str, u32)> = branch_scores
            .into_iter()
            .map(|(branch, score)| {
                let label = if score > 5 {
                    "high"
                } else if score > 2 {
                    "medium"
                } else {
                    "low"
                };
                (branch, label, score)
            })
            .collect();
        hotspots.sort_by(|a, b| b.2.cmp(&a.2));
        hotspots.truncate(5);

        let average_likelihood = predictions
            .values()
            .map(|prediction| prediction.likelihood_score)
            .sum::<f64>()
            / predictions.len() as f64;

        PatternAnalysis {
            frequent_conflict_files,
            hotspots,
            pattern_distribution,
            daily_trend,
            total_predictions: predictions.len(),
            average_likelihood,
        }
    }
}

fn jaccard(set1: &BTreeSet<String>, set2: &BTreeSet<String>) -> f64 {
    if set1.is_empty() && set2.is_empty() {
        return 0.0;
    }
    let intersection = set1.intersection(set2).count();
    let union = set1.len() + set2.len() - intersection;
    intersection as f64 / union.max(1) as f64
}

/// Dice coefficient over character bigrams.
pub(crate) fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let bigrams = |text: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = text.chars().collect();
        chars.windows(2).map(|pair| (pair[0], pair[1])).collect()
    };
    let mut bigrams1 = bigrams(a);
    let bigrams2 = bigrams(b);
    if bigrams1.is_empty() || bigrams2.is_empty() {
        return 0.0;
    }

    let total = bigrams1.len() + bigrams2.len();
    let mut matches = 0usize;
    for bigram in &bigrams2 {
        if let Some(position) = bigrams1.iter().position(|candidate| candidate == bigram) {
            bigrams1.swap_remove(position);
            matches += 1;
        }
    }
    2.0 * matches as f64 / total as f64
}

/// Two import lists likely collide when they share a substantial core but
/// each adds its own entries, or when near-identical statements differ.
pub(crate) fn imports_likely_to_conflict(imports1: &[String], imports2: &[String]) -> bool {
    let set1: BTreeSet<&String> = imports1.iter().collect();
    let set2: BTreeSet<&String> = imports2.iter().collect();

    let overlap = set1.intersection(&set2).count();
    let different = set1.symmetric_difference(&set2).count();
    if overlap >= IMPORT_OVERLAP_THRESHOLD && different >= IMPORT_DIFFERENCE_THRESHOLD {
        return true;
    }

    imports1.iter().any(|import1| {
        imports2.iter().any(|import2| {
            import1 != import2 && similarity(import1, import2) > SIMILARITY_THRESHOLD
        })
    })
}

pub(crate) fn import_conflict_likelihood(affected_files: usize, vector: &ConflictVector) -> f64 {
    (0.35 * affected_files as f64 + vector.file_overlap * 0.3 + vector.change_frequency * 0.2)
        .clamp(0.0, 1.0)
}

pub(crate) fn version_distance(version1: &str, version2: &str) -> f64 {
    let parse = |version: &str| -> Vec<i64> {
        version
            .split('.')
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect()
    };
    let mut parts1 = parse(version1);
    let mut parts2 = parse(version2);
    if parts1.is_empty() && parts2.is_empty() {
        return 0.5;
    }

    let width = parts1.len().max(parts2.len());
    parts1.resize(width, 0);
    parts2.resize(width, 0);

    let mut distance = 0.0;
    let mut weight = 1.0;
    for (part1, part2) in parts1.iter().zip(parts2.iter()) {
        distance += (part1 - part2).abs() as f64 * weight;
        weight *= 0.1;
    }
    (distance / 10.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_bands_at_exact_boundaries() {
        assert_eq!(PredictionConfidence::from_likelihood(0.9), PredictionConfidence::Critical);
        assert_eq!(PredictionConfidence::from_likelihood(0.89), PredictionConfidence::High);
        assert_eq!(PredictionConfidence::from_likelihood(0.7), PredictionConfidence::High);
        assert_eq!(PredictionConfidence::from_likelihood(0.69), PredictionConfidence::Medium);
        assert_eq!(PredictionConfidence::from_likelihood(0.4), PredictionConfidence::Medium);
        assert_eq!(PredictionConfidence::from_likelihood(0.39), PredictionConfidence::Low);
        assert_eq!(PredictionConfidence::from_likelihood(0.0), PredictionConfidence::Low);
    }

    #[test]
    fn overlapping_import_sets_are_flagged() {
        // 6 vs 9 imports with 5 shared, per the overlap heuristic.
        let shared: Vec<String> = (0..5).map(|i| format!("import shared_{i}")).collect();
        let mut imports1 = shared.clone();
        imports1.push("import only_first".to_string());
        let mut imports2 = shared;
        for i in 0..4 {
            imports2.push(format!("import only_second_{i}"));
        }
        assert_eq!(imports1.len(), 6);
        assert_eq!(imports2.len(), 9);
        assert!(imports_likely_to_conflict(&imports1, &imports2));

        let likelihood = import_conflict_likelihood(1, &ConflictVector::default());
        assert!(likelihood > 0.3);
        assert!((0.0..=1.0).contains(&likelihood));
    }

    #[test]
    fn disjoint_small_import_sets_are_not_flagged() {
        let imports1 = vec!["import alpha_module".to_string()];
        let imports2 = vec!["import omega_pkg".to_string()];
        assert!(!imports_likely_to_conflict(&imports1, &imports2));
    }

    #[test]
    fn near_identical_imports_are_flagged_by_similarity() {
        let imports1 = vec!["from package.module import handler_one".to_string()];
        let imports2 = vec!["from package.module import handler_two".to_string()];
        assert!(imports_likely_to_conflict(&imports1, &imports2));
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let a = "def handle(a, b)";
        let b = "def handle(a, b, c)";
        let forward = similarity(a, b);
        let backward = similarity(b, a);
        assert!((forward - backward).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&forward));
        assert_eq!(similarity("same", "same"), 1.0);
    }

    #[test]
    fn version_distance_weights_major_versions() {
        let major = version_distance("2.0.0", "1.0.0");
        let patch = version_distance("1.0.1", "1.0.0");
        assert!(major > patch);
        assert!((0.0..=1.0).contains(&major));
        assert_eq!(version_distance("", ""), 0.5);
    }

    #[test]
    fn jaccard_of_empty_sets_is_zero() {
        assert_eq!(jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
        let set1: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        let set2: BTreeSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        assert!((jaccard(&set1, &set2) - 0.5).abs() < 1e-9);
    }
}
