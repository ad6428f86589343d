use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::analysis::{content_hash, SemanticAnalyzer, SemanticConflict, SemanticConflictKind};
use crate::config::MergeConfig;
use crate::git::GitClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStrategy {
    Intelligent,
    AstBased,
    FunctionLevel,
    SemanticUnion,
    Contextual,
    PreferFirst,
    PreferSecond,
}

impl MergeStrategy {
    pub fn slug(self) -> &'static str {
        match self {
            MergeStrategy::Intelligent => "intelligent",
            MergeStrategy::AstBased => "ast_based",
            MergeStrategy::FunctionLevel => "function_level",
            MergeStrategy::SemanticUnion => "semantic_union",
            MergeStrategy::Contextual => "contextual",
            MergeStrategy::PreferFirst => "prefer_first",
            MergeStrategy::PreferSecond => "prefer_second",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResolution {
    AutoResolved,
    PartialResolution,
    ManualRequired,
    MergeFailed,
}

#[derive(Debug, Clone, Default)]
pub struct DiffStats {
    pub lines_original1: usize,
    pub lines_original2: usize,
    pub lines_merged: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// Result of one semantic merge operation.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub id: String,
    pub file_path: String,
    pub resolution: MergeResolution,
    pub strategy_used: MergeStrategy,
    pub merged_content: Option<String>,
    pub conflicts_resolved: Vec<String>,
    pub unresolved_conflicts: Vec<String>,
    pub merge_confidence: f64,
    pub semantic_integrity: bool,
    pub diff_stats: DiffStats,
    pub merged_at: DateTime<Utc>,
}

impl MergeResult {
    fn failed(id: String, file_path: &str, strategy: MergeStrategy) -> Self {
        Self {
            id,
            file_path: file_path.to_string(),
            resolution: MergeResolution::MergeFailed,
            strategy_used: strategy,
            merged_content: None,
            conflicts_resolved: Vec::new(),
            unresolved_conflicts: Vec::new(),
            merge_confidence: 0.0,
            semantic_integrity: false,
            diff_stats: DiffStats::default(),
            merged_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    pub total_merges: u64,
    pub successful_merges: u64,
    pub auto_resolved: u64,
    pub manual_required: u64,
    pub semantic_integrity_maintained: u64,
    pub average_confidence: f64,
}

/// Applies one of several merge strategies to produce merged file content.
///
/// Every produced result is re-parsed through the structural parser; a
/// parse failure forces `semantic_integrity = false` no matter how
/// confident the strategy was.
pub struct SemanticMerger {
    analyzer: Arc<SemanticAnalyzer>,
    git: GitClient,
    config: MergeConfig,
    default_strategy: MergeStrategy,
    results: Mutex<HashMap<String, MergeResult>>,
    history: Mutex<Vec<MergeResult>>,
    stats: std::sync::Mutex<MergeStats>,
}

impl SemanticMerger {
    pub fn new(analyzer: Arc<SemanticAnalyzer>, git: GitClient, config: MergeConfig) -> Self {
        Self {
            analyzer,
            git,
            config,
            default_strategy: MergeStrategy::Intelligent,
            results: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            stats: std::sync::Mutex::new(MergeStats::default()),
        }
    }

    fn merge_id(branch1: &str, branch2: &str, file_path: &str) -> String {
        let digest = content_hash(file_path);
        format!("merge:{branch1}:{branch2}:{}", &digest[..8])
    }

    /// Merge one file across two branches and record the result.
    pub async fn perform_semantic_merge(
        &self,
        file_path: &str,
        branch1: &str,
        branch2: &str,
        strategy: Option<MergeStrategy>,
    ) -> MergeResult {
        info!(file = %file_path, branch1 = %branch1, branch2 = %branch2, "Performing semantic merge");

        let id = Self::merge_id(branch1, branch2, file_path);
        let strategy = strategy.unwrap_or(self.default_strategy);

        let content1 = self.git.file_content(branch1, file_path).await.ok().flatten();
        let content2 = self.git.file_content(branch2, file_path).await.ok().flatten();

        let (Some(content1), Some(content2)) = (content1, content2) else {
            warn!(file = %file_path, "Could not retrieve file contents from both branches");
            let result = MergeResult::failed(id, file_path, strategy);
            self.record_result(&result).await;
            return result;
        };

        let conflicts = self.analyzer.analyze_file(file_path, branch1, branch2).await;
        let result =
            self.merge_contents_with_id(id, file_path, &content1, &content2, &conflicts, strategy);
        self.record_result(&result).await;

        info!(file = %file_path, resolution = ?result.resolution, "Merge completed");
        result
    }

    /// Content-level merge, no git involved. The public entry point for
    /// consumers that already hold both sides.
    pub fn merge_contents(
        &self,
        file_path: &str,
        content1: &str,
        content2: &str,
        conflicts: &[SemanticConflict],
        strategy: MergeStrategy,
    ) -> MergeResult {
        let id = Self::merge_id("local", "local", file_path);
        self.merge_contents_with_id(id, file_path, content1, content2, conflicts, strategy)
    }

    fn merge_contents_with_id(
        &self,
        id: String,
        file_path: &str,
        content1: &str,
        content2: &str,
        conflicts: &[SemanticConflict],
        strategy: MergeStrategy,
    ) -> MergeResult {
        let mut result = match strategy {
            MergeStrategy::Intelligent | MergeStrategy::Contextual => {
                self.intelligent_merge(id, file_path, content1, content2, conflicts)
            }
            MergeStrategy::AstBased => self.ast_based_merge(id, file_path, content1, content2),
            MergeStrategy::FunctionLevel => {
                self.function_level_merge(id, file_path, content1, content2, conflicts)
            }
            MergeStrategy::SemanticUnion => {
                self.semantic_union_merge(id, file_path, content1, content2, conflicts)
            }
            MergeStrategy::PreferFirst => {
                Self::prefer_branch_merge(id, file_path, content1, conflicts, MergeStrategy::PreferFirst)
            }
            MergeStrategy::PreferSecond => {
                Self::prefer_branch_merge(id, file_path, content2, conflicts, MergeStrategy::PreferSecond)
            }
        };

        // Round-trip law: whatever the strategy claims, unparsable output
        // loses its integrity bit.
        if let Some(merged) = &result.merged_content {
            if self.analyzer.parser().handles(file_path)
                && self.analyzer.parse_source(file_path, merged).is_err()
            {
                result.semantic_integrity = false;
            }
        } else {
            result.semantic_integrity = false;
        }

        result
    }

    fn intelligent_merge(
        &self,
        id: String,
        file_path: &str,
        content1: &str,
        content2: &str,
        conflicts: &[SemanticConflict],
    ) -> MergeResult {
        let context1 = match self.analyzer.parse_source(file_path, content1) {
            Ok(context) => context,
            Err(_) => return MergeResult::failed(id, file_path, MergeStrategy::Intelligent),
        };
        let context2 = match self.analyzer.parse_source(file_path, content2) {
            Ok(context) => context,
            Err(_) => return MergeResult::failed(id, file_path, MergeStrategy::Intelligent),
        };

        let mut merged = content1.to_string();
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        let mut confidences = Vec::new();

        for conflict in conflicts {
            match conflict.kind {
                SemanticConflictKind::ImportSemanticConflict => {
                    merged = apply_import_union(&merged, content2);
                    resolved.push(conflict.id.clone());
                    confidences.push(0.9);
                }
                SemanticConflictKind::FunctionSignatureChange
                | SemanticConflictKind::ClassInterfaceChange => {
                    let name = conflict
                        .symbol_name
                        .rsplit('.')
                        .next()
                        .unwrap_or(&conflict.symbol_name);
                    let (args1, args2) = match conflict.kind {
                        SemanticConflictKind::ClassInterfaceChange => {
                            let class = conflict.symbol_name.split('.').next().unwrap_or("");
                            (
                                context1
                                    .classes
                                    .get(class)
                                    .and_then(|c| c.methods.get(name))
                                    .map(|f| f.args.len()),
                                context2
                                    .classes
                                    .get(class)
                                    .and_then(|c| c.methods.get(name))
                                    .map(|f| f.args.len()),
                            )
                        }
                        _ => (
                            context1.functions.get(name).map(|f| f.args.len()),
                            context2.functions.get(name).map(|f| f.args.len()),
                        ),
                    };

                    // Additive signature changes take the wider side.
                    if let (Some(count1), Some(count2)) = (args1, args2) {
                        if count2 >= count1 {
                            merged = replace_def_line(&merged, name, content2);
                            resolved.push(conflict.id.clone());
                            confidences.push(0.7);
                            continue;
                        }
                    }
                    unresolved.push(conflict.id.clone());
                }
                _ => unresolved.push(conflict.id.clone()),
            }
        }

        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        let resolution = if unresolved.is_empty() {
            MergeResolution::AutoResolved
        } else if !resolved.is_empty() {
            MergeResolution::PartialResolution
        } else {
            MergeResolution::ManualRequired
        };

        MergeResult {
            id,
            file_path: file_path.to_string(),
            resolution,
            strategy_used: MergeStrategy::Intelligent,
            diff_stats: diff_stats(content1, content2, &merged),
            merged_content: Some(merged),
            conflicts_resolved: resolved,
            unresolved_conflicts: unresolved,
            merge_confidence: confidence,
            semantic_integrity: true,
            merged_at: Utc::now(),
        }
    }

    /// Structure-preserving merge: keeps the first branch's tree when both
    /// sides parse.
    fn ast_based_merge(
        &self,
        id: String,
        file_path: &str,
        content1: &str,
        content2: &str,
    ) -> MergeResult {
        let both_parse = self.analyzer.parse_source(file_path, content1).is_ok()
            && self.analyzer.parse_source(file_path, content2).is_ok();
        if !both_parse {
            return MergeResult::failed(id, file_path, MergeStrategy::AstBased);
        }

        MergeResult {
            id,
            file_path: file_path.to_string(),
            resolution: MergeResolution::AutoResolved,
            strategy_used: MergeStrategy::AstBased,
            diff_stats: diff_stats(content1, content2, content1),
            merged_content: Some(content1.to_string()),
            conflicts_resolved: Vec::new(),
            unresolved_conflicts: Vec::new(),
            merge_confidence: 0.8,
            semantic_integrity: true,
            merged_at: Utc::now(),
        }
    }

    fn function_level_merge(
        &self,
        id: String,
        file_path: &str,
        content1: &str,
        content2: &str,
        conflicts: &[SemanticConflict],
    ) -> MergeResult {
        let functions1 = extract_function_blocks(content1);
        let functions2 = extract_function_blocks(content2);

        let mut names: Vec<String> = functions1.keys().cloned().collect();
        for name in functions2.keys() {
            if !functions1.contains_key(name) {
                names.push(name.clone());
            }
        }
        names.sort();

        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        let mut merged_blocks = Vec::new();

        for name in &names {
            match (functions1.get(name), functions2.get(name)) {
                (Some(block1), Some(block2)) => {
                    let conflict = conflicts.iter().find(|conflict| {
                        conflict.symbol_name == *name
                            && conflict.kind == SemanticConflictKind::FunctionSignatureChange
                    });
                    match conflict {
                        Some(conflict) => {
                            // Signature conflicts take the second side when
                            // it does not shrink the parameter list.
                            let wider = param_count_of(block2) >= param_count_of(block1);
                            if wider {
                                merged_blocks.push(block2.clone());
                                resolved.push(conflict.id.clone());
                            } else {
                                merged_blocks.push(block1.clone());
                                unresolved.push(conflict.id.clone());
                            }
                        }
                        None => merged_blocks.push(block2.clone()),
                    }
                }
                (Some(block), None) => merged_blocks.push(block.clone()),
                (None, Some(block)) => merged_blocks.push(block.clone()),
                (None, None) => {}
            }
        }

        let prefix = non_function_prefix(content1);
        let mut merged = prefix;
        for block in merged_blocks {
            if !merged.is_empty() && !merged.ends_with("\n\n") {
                merged.push_str("\n\n");
            }
            merged.push_str(block.trim_end());
            merged.push('\n');
        }

        let confidence = resolved.len() as f64 / conflicts.len().max(1) as f64;
        let resolution = if unresolved.is_empty() {
            MergeResolution::AutoResolved
        } else if !resolved.is_empty() {
            MergeResolution::PartialResolution
        } else {
            MergeResolution::ManualRequired
        };

        MergeResult {
            id,
            file_path: file_path.to_string(),
            resolution,
            strategy_used: MergeStrategy::FunctionLevel,
            diff_stats: diff_stats(content1, content2, &merged),
            merged_content: Some(merged),
            conflicts_resolved: resolved,
            unresolved_conflicts: unresolved,
            merge_confidence: confidence,
            semantic_integrity: true,
            merged_at: Utc::now(),
        }
    }

    /// Union of both sides' imports followed by the second branch's body.
    fn semantic_union_merge(
        &self,
        id: String,
        file_path: &str,
        content1: &str,
        content2: &str,
        conflicts: &[SemanticConflict],
    ) -> MergeResult {
        let merged = apply_import_union(content2, content1);

        let union_kinds = [
            SemanticConflictKind::ImportSemanticConflict,
            SemanticConflictKind::FunctionSignatureChange,
            SemanticConflictKind::ClassInterfaceChange,
        ];
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for conflict in conflicts {
            if union_kinds.contains(&conflict.kind) {
                resolved.push(conflict.id.clone());
            } else {
                unresolved.push(conflict.id.clone());
            }
        }

        let confidence = resolved.len() as f64 / conflicts.len().max(1) as f64;
        let resolution = if unresolved.is_empty() {
            MergeResolution::AutoResolved
        } else {
            MergeResolution::PartialResolution
        };

        MergeResult {
            id,
            file_path: file_path.to_string(),
            resolution,
            strategy_used: MergeStrategy::SemanticUnion,
            diff_stats: diff_stats(content1, content2, &merged),
            merged_content: Some(merged),
            conflicts_resolved: resolved,
            unresolved_conflicts: unresolved,
            merge_confidence: confidence,
            semantic_integrity: true,
            merged_at: Utc::now(),
        }
    }

    fn prefer_branch_merge(
        id: String,
        file_path: &str,
        content: &str,
        conflicts: &[SemanticConflict],
        strategy: MergeStrategy,
    ) -> MergeResult {
        MergeResult {
            id,
            file_path: file_path.to_string(),
            resolution: MergeResolution::AutoResolved,
            strategy_used: strategy,
            diff_stats: diff_stats(content, content, content),
            merged_content: Some(content.to_string()),
            conflicts_resolved: conflicts.iter().map(|conflict| conflict.id.clone()).collect(),
            unresolved_conflicts: Vec::new(),
            merge_confidence: 1.0,
            semantic_integrity: true,
            merged_at: Utc::now(),
        }
    }

    /// Merge many files with bounded concurrency. A per-file failure
    /// becomes a MergeFailed result; the batch always completes.
    pub async fn batch_merge_files(
        self: &Arc<Self>,
        file_paths: Vec<String>,
        branch1: &str,
        branch2: &str,
        max_concurrent: Option<usize>,
    ) -> Vec<MergeResult> {
        info!(count = file_paths.len(), "Starting batch merge");
        let limit = max_concurrent.unwrap_or(self.config.max_concurrent).max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        let mut join_set = JoinSet::new();
        for (index, file_path) in file_paths.iter().cloned().enumerate() {
            let merger = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let branch1 = branch1.to_string();
            let branch2 = branch2.to_string();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = merger
                    .perform_semantic_merge(&file_path, &branch1, &branch2, None)
                    .await;
                (index, result)
            });
        }

        let mut indexed: Vec<(usize, MergeResult)> = Vec::new();
        let mut task_index = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(entry) => indexed.push(entry),
                Err(error) => {
                    warn!(%error, "Batch merge task failed");
                    let file_path = file_paths
                        .get(task_index)
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string());
                    indexed.push((
                        usize::MAX,
                        MergeResult::failed(
                            format!("merge:error:{task_index}"),
                            &file_path,
                            self.default_strategy,
                        ),
                    ));
                }
            }
            task_index += 1;
        }

        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<MergeResult> = indexed.into_iter().map(|(_, result)| result).collect();
        info!(count = results.len(), "Batch merge completed");
        results
    }

    /// Resolve a set of semantic conflicts by merging each affected file
    /// with the strategy best suited to its conflict mix.
    pub async fn auto_resolve_conflicts(
        self: &Arc<Self>,
        conflicts: Vec<SemanticConflict>,
    ) -> Vec<MergeResult> {
        info!(count = conflicts.len(), "Auto-resolving semantic conflicts");

        let mut by_file: Vec<(String, Vec<SemanticConflict>)> = Vec::new();
        for conflict in conflicts {
            match by_file.iter_mut().find(|(file, _)| *file == conflict.file_path) {
                Some((_, group)) => group.push(conflict),
                None => by_file.push((conflict.file_path.clone(), vec![conflict])),
            }
        }

        let mut results = Vec::new();
        for (file_path, group) in by_file {
            let strategy = select_optimal_strategy(&group);
            let first = &group[0];
            let result = self
                .perform_semantic_merge(
                    &file_path,
                    &first.branch1.clone(),
                    &first.branch2.clone(),
                    Some(strategy),
                )
                .await;
            results.push(result);
        }

        info!(count = results.len(), "Auto-resolution completed");
        results
    }

    async fn record_result(&self, result: &MergeResult) {
        self.results
            .lock()
            .await
            .insert(result.id.clone(), result.clone());
        self.history.lock().await.push(result.clone());

        let mut stats = self.stats.lock().unwrap();
        stats.total_merges += 1;
        match result.resolution {
            MergeResolution::AutoResolved => {
                stats.successful_merges += 1;
                stats.auto_resolved += 1;
            }
            MergeResolution::PartialResolution => stats.successful_merges += 1,
            MergeResolution::ManualRequired => stats.manual_required += 1,
            MergeResolution::MergeFailed => {}
        }
        if result.semantic_integrity {
            stats.semantic_integrity_maintained += 1;
        }
        let previous_total = stats.average_confidence * (stats.total_merges - 1) as f64;
        stats.average_confidence =
            (previous_total + result.merge_confidence) / stats.total_merges as f64;
    }

    pub fn get_merge_stats(&self) -> MergeStats {
        self.stats.lock().unwrap().clone()
    }

    pub async fn recent_merges(&self, limit: usize) -> Vec<MergeResult> {
        let history = self.history.lock().await;
        history.iter().rev().take(limit).cloned().collect()
    }
}

/// Best strategy for a file, by which conflict kinds dominate.
pub(crate) fn select_optimal_strategy(conflicts: &[SemanticConflict]) -> MergeStrategy {
    let count = |kind: SemanticConflictKind| {
        conflicts.iter().filter(|conflict| conflict.kind == kind).count()
    };

    if count(SemanticConflictKind::FunctionSignatureChange) > 0 {
        MergeStrategy::FunctionLevel
    } else if count(SemanticConflictKind::ImportSemanticConflict) > 0 {
        MergeStrategy::SemanticUnion
    } else if count(SemanticConflictKind::ClassInterfaceChange) > 0 {
        MergeStrategy::AstBased
    } else {
        MergeStrategy::Intelligent
    }
}

fn is_import_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("import ") || trimmed.starts_with("from ")
}

/// Deduplicated, sorted union of both sides' import lines, followed by the
/// base content with its own import lines removed.
pub(crate) fn apply_import_union(base: &str, other: &str) -> String {
    let mut imports: BTreeSet<String> = BTreeSet::new();
    for line in base.lines().chain(other.lines()) {
        if is_import_line(line) {
            imports.insert(line.trim().to_string());
        }
    }

    let body: Vec<&str> = base.lines().filter(|line| !is_import_line(line)).collect();
    let body = body.join("\n").trim_start_matches('\n').to_string();

    let mut merged = imports.into_iter().collect::<Vec<_>>().join("\n");
    if !merged.is_empty() {
        merged.push('\n');
    }
    if !body.is_empty() {
        merged.push('\n');
        merged.push_str(&body);
    }
    if !merged.ends_with('\n') {
        merged.push('\n');
    }
    merged
}

/// Replace the `def <name>(...)` line in `merged` with the one found in
/// `source`. Leaves `merged` untouched when either side lacks the def.
fn replace_def_line(merged: &str, name: &str, source: &str) -> String {
    let Ok(def_regex) = Regex::new(&format!(
        r"(?m)^[ \t]*(?:async\s+)?def\s+{name}\s*\([^)]*\)[^:\n]*:"
    )) else {
        return merged.to_string();
    };

    let Some(replacement) = def_regex.find(source).map(|found| found.as_str().to_string()) else {
        return merged.to_string();
    };
    let Some(target) = def_regex.find(merged) else {
        return merged.to_string();
    };

    let mut updated = merged.to_string();
    updated.replace_range(target.range(), &replacement);
    updated
}

fn param_count_of(block: &str) -> usize {
    block
        .lines()
        .next()
        .map(super::engine::count_params)
        .unwrap_or(0)
}

/// Top-level function blocks keyed by name, body captured until the next
/// top-level statement.
fn extract_function_blocks(content: &str) -> HashMap<String, String> {
    let def_start = Regex::new(r"^(?:async\s+)?def\s+(\w+)\s*\(").unwrap();
    let lines: Vec<&str> = content.lines().collect();

    let mut blocks = HashMap::new();
    let mut index = 0;
    while index < lines.len() {
        let line = lines[index];
        if let Some(captures) = def_start.captures(line) {
            if !line.starts_with(' ') && !line.starts_with('\t') {
                let name = captures[1].to_string();
                let mut end = index + 1;
                while end < lines.len() {
                    let candidate = lines[end];
                    let is_top_level = !candidate.starts_with(' ')
                        && !candidate.starts_with('\t')
                        && !candidate.trim().is_empty();
                    if is_top_level {
                        break;
                    }
                    end += 1;
                }
                blocks.insert(name, lines[index..end].join("\n"));
                index = end;
                continue;
            }
        }
        index += 1;
    }
    blocks
}

/// Everything before the first top-level def.
fn non_function_prefix(content: &str) -> String {
    let def_start = Regex::new(r"^(?:async\s+)?def\s+\w+\s*\(").unwrap();
    let mut prefix_lines = Vec::new();
    for line in content.lines() {
        if def_start.is_match(line) {
            break;
        }
        prefix_lines.push(line);
    }
    let mut prefix = prefix_lines.join("\n");
    if !prefix.is_empty() {
        prefix.push('\n');
    }
    prefix
}

fn diff_stats(content1: &str, content2: &str, merged: &str) -> DiffStats {
    let lines1 = content1.lines().count();
    let lines2 = content2.lines().count();
    let lines_merged = merged.lines().count();
    DiffStats {
        lines_original1: lines1,
        lines_original2: lines2,
        lines_merged,
        lines_added: lines_merged.saturating_sub(lines1),
        lines_removed: lines1.saturating_sub(lines_merged),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PythonParser;
    use crate::config::AnalysisConfig;

    fn merger() -> SemanticMerger {
        let analyzer = Arc::new(SemanticAnalyzer::new(
            GitClient::new("."),
            Arc::new(PythonParser::with_fallback()),
            AnalysisConfig::default(),
        ));
        SemanticMerger::new(analyzer, GitClient::new("."), MergeConfig::default())
    }

    #[test]
    fn import_union_is_sorted_and_deduplicated() {
        let base = "import os\nimport sys\n\nvalue = 1\n";
        let other = "import json\nimport sys\n\nvalue = 2\n";
        let merged = apply_import_union(base, other);
        let import_lines: Vec<&str> = merged
            .lines()
            .filter(|line| line.starts_with("import"))
            .collect();
        assert_eq!(import_lines, vec!["import json", "import os", "import sys"]);
        assert!(merged.contains("value = 1"));
        assert!(!merged.contains("value = 2"));
    }

    #[test]
    fn prefer_second_takes_content_verbatim() {
        let merger = merger();
        let result = merger.merge_contents(
            "mod.py",
            "def a():\n    pass\n",
            "def b():\n    pass\n",
            &[],
            MergeStrategy::PreferSecond,
        );
        assert_eq!(result.resolution, MergeResolution::AutoResolved);
        assert_eq!(result.merged_content.as_deref(), Some("def b():\n    pass\n"));
        assert_eq!(result.merge_confidence, 1.0);
        assert!(result.semantic_integrity);
    }

    #[test]
    fn function_blocks_are_extracted_to_the_next_top_level_statement() {
        let content = "import os\n\ndef first(a):\n    x = 1\n    return x\n\ndef second():\n    pass\n";
        let blocks = extract_function_blocks(content);
        assert_eq!(blocks.len(), 2);
        assert!(blocks["first"].contains("return x"));
        assert!(!blocks["first"].contains("def second"));
    }

    #[test]
    fn replace_def_line_swaps_only_the_signature() {
        let merged = "def handle(a):\n    return a\n";
        let source = "def handle(a, b=2):\n    return a + b\n";
        let updated = replace_def_line(merged, "handle", source);
        assert!(updated.starts_with("def handle(a, b=2):"));
        assert!(updated.contains("return a\n"));
    }

    #[test]
    fn strategy_selection_prefers_function_level_for_signature_drift() {
        let merger = merger();
        let context1 = merger
            .analyzer
            .parse_source("mod.py", "def f(a):\n    pass\n")
            .unwrap();
        let context2 = merger
            .analyzer
            .parse_source("mod.py", "def f(a, b):\n    pass\n")
            .unwrap();
        let conflicts = merger
            .analyzer
            .diff_contexts(&context1, &context2, "x", "y", "mod.py");
        assert_eq!(select_optimal_strategy(&conflicts), MergeStrategy::FunctionLevel);
    }

    #[test]
    fn intelligent_merge_resolves_additive_signature_change() {
        let merger = merger();
        let content1 = "def f(a):\n    pass\n";
        let content2 = "def f(a, b):\n    pass\n";
        let context1 = merger.analyzer.parse_source("mod.py", content1).unwrap();
        let context2 = merger.analyzer.parse_source("mod.py", content2).unwrap();
        let conflicts = merger
            .analyzer
            .diff_contexts(&context1, &context2, "x", "y", "mod.py");

        let result =
            merger.merge_contents("mod.py", content1, content2, &conflicts, MergeStrategy::Intelligent);
        assert_eq!(result.resolution, MergeResolution::AutoResolved);
        assert!(result.merged_content.unwrap().contains("def f(a, b):"));
        assert!(result.merge_confidence > 0.6);
    }

    #[test]
    fn variable_type_conflicts_stay_unresolved() {
        let merger = merger();
        let content1 = "retries = 3\n";
        let content2 = "retries = \"three\"\n";
        let context1 = merger.analyzer.parse_source("mod.py", content1).unwrap();
        let context2 = merger.analyzer.parse_source("mod.py", content2).unwrap();
        let conflicts = merger
            .analyzer
            .diff_contexts(&context1, &context2, "x", "y", "mod.py");

        let result =
            merger.merge_contents("mod.py", content1, content2, &conflicts, MergeStrategy::Intelligent);
        assert_eq!(result.resolution, MergeResolution::ManualRequired);
        assert_eq!(result.unresolved_conflicts.len(), 1);
    }
}
