use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::git::GitClient;
use crate::resolution::{ConflictSeverity, ResolutionStrategy};

use super::parser::{content_hash, StructuralParser};
use super::types::{ClassDefinition, FunctionSignature, SemanticContext, Visibility};

/// Kinds of structural conflicts the analyzer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticConflictKind {
    FunctionSignatureChange,
    ClassInterfaceChange,
    ApiBreakingChange,
    InheritanceConflict,
    ImportSemanticConflict,
    VariableTypeConflict,
}

impl SemanticConflictKind {
    pub fn slug(self) -> &'static str {
        match self {
            SemanticConflictKind::FunctionSignatureChange => "func_sig",
            SemanticConflictKind::ClassInterfaceChange => "class_iface",
            SemanticConflictKind::ApiBreakingChange => "api_break",
            SemanticConflictKind::InheritanceConflict => "inherit",
            SemanticConflictKind::ImportSemanticConflict => "import",
            SemanticConflictKind::VariableTypeConflict => "var_type",
        }
    }

    fn weight(self) -> u32 {
        match self {
            SemanticConflictKind::ApiBreakingChange => 500,
            SemanticConflictKind::FunctionSignatureChange => 100,
            SemanticConflictKind::ClassInterfaceChange => 80,
            SemanticConflictKind::InheritanceConflict => 60,
            SemanticConflictKind::ImportSemanticConflict => 40,
            SemanticConflictKind::VariableTypeConflict => 20,
        }
    }
}

/// Impact of a signature change on callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpactAnalysis {
    pub breaking_change: bool,
    pub parameter_changes: Vec<String>,
    pub return_type_change: bool,
    pub decorator_changes: bool,
}

/// Structural conflict between two branches' versions of one symbol.
#[derive(Debug, Clone)]
pub struct SemanticConflict {
    pub id: String,
    pub kind: SemanticConflictKind,
    pub severity: ConflictSeverity,
    pub symbol_name: String,
    pub file_path: String,
    pub branch1: String,
    pub branch2: String,
    pub description: String,
    pub old_definition: Option<String>,
    pub new_definition: Option<String>,
    pub impact: ImpactAnalysis,
    pub suggested_resolution: ResolutionStrategy,
    pub detected_at: DateTime<Utc>,
}

impl SemanticConflict {
    pub fn is_public_symbol(&self) -> bool {
        !self
            .symbol_name
            .split('.')
            .next_back()
            .unwrap_or(&self.symbol_name)
            .starts_with('_')
    }

    fn priority(&self) -> u32 {
        let severity_weight = match self.severity {
            ConflictSeverity::Critical => 1000,
            ConflictSeverity::High => 100,
            ConflictSeverity::Medium => 10,
            ConflictSeverity::Low => 1,
        };
        severity_weight + self.kind.weight() + if self.is_public_symbol() { 50 } else { 0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisSummary {
    pub files_analyzed: u64,
    pub conflicts_detected: u64,
    pub cache_hits: u64,
    pub analysis_time_secs: f64,
    pub cache_size: u64,
}

/// Structural conflict analyzer.
///
/// Contexts are cached per (branch, file) keyed by content hash; a hash
/// mismatch re-parses, so stale entries are invalidated implicitly. Parse
/// failures skip the file and never abort a batch.
pub struct SemanticAnalyzer {
    git: GitClient,
    parser: Arc<dyn StructuralParser>,
    config: AnalysisConfig,
    contexts: Cache<String, Arc<SemanticContext>>,
    stats: Mutex<AnalysisSummary>,
}

impl SemanticAnalyzer {
    pub fn new(git: GitClient, parser: Arc<dyn StructuralParser>, config: AnalysisConfig) -> Self {
        let contexts = Cache::builder().max_capacity(config.cache_capacity).build();
        Self {
            git,
            parser,
            config,
            contexts,
            stats: Mutex::new(AnalysisSummary::default()),
        }
    }

    pub fn parser(&self) -> &Arc<dyn StructuralParser> {
        &self.parser
    }

    /// Parse arbitrary source text through the configured parser.
    pub fn parse_source(&self, file_path: &str, source: &str) -> Result<SemanticContext> {
        self.parser.parse(file_path, source)
    }

    /// Structural context of a file as of a branch, from cache when the
    /// content hash still matches. `None` when the file is missing on the
    /// branch or does not parse.
    pub async fn context_for(&self, branch: &str, file_path: &str) -> Result<Option<Arc<SemanticContext>>> {
        let Some(content) = self.git.file_content(branch, file_path).await? else {
            return Ok(None);
        };

        let hash = content_hash(&content);
        let key = format!("{branch}:{file_path}");

        if let Some(cached) = self.contexts.get(&key).await {
            if cached.content_hash == hash {
                self.stats.lock().unwrap().cache_hits += 1;
                return Ok(Some(cached));
            }
        }

        match self.parser.parse(file_path, &content) {
            Ok(context) => {
                let context = Arc::new(context);
                self.contexts.insert(key, context.clone()).await;
                Ok(Some(context))
            }
            Err(error) => {
                warn!(file = %file_path, branch = %branch, %error, "Skipping unparsable file");
                Ok(None)
            }
        }
    }

    /// Analyze structural conflicts between two branches. With no file list,
    /// the intersection of both branches' changed files is used.
    pub async fn analyze_semantic_conflicts(
        &self,
        branch1: &str,
        branch2: &str,
        file_paths: Option<Vec<String>>,
    ) -> Result<Vec<SemanticConflict>> {
        info!(branch1 = %branch1, branch2 = %branch2, "Analyzing semantic conflicts");
        let started = Instant::now();

        let files = match file_paths {
            Some(files) => files,
            None => self.shared_changed_files(branch1, branch2).await?,
        };

        let mut conflicts = Vec::new();
        for file_path in &files {
            let file_conflicts = self.analyze_file(file_path, branch1, branch2).await;
            conflicts.extend(file_conflicts);
            self.stats.lock().unwrap().files_analyzed += 1;
        }

        conflicts.sort_by(|a, b| b.priority().cmp(&a.priority()));

        {
            let mut stats = self.stats.lock().unwrap();
            stats.conflicts_detected += conflicts.len() as u64;
            stats.analysis_time_secs += started.elapsed().as_secs_f64();
        }

        info!(count = conflicts.len(), "Semantic analysis complete");
        Ok(conflicts)
    }

    /// Conflicts for one file. Errors on either side degrade to an empty
    /// result for the file.
    pub async fn analyze_file(
        &self,
        file_path: &str,
        branch1: &str,
        branch2: &str,
    ) -> Vec<SemanticConflict> {
        let context1 = match self.context_for(branch1, file_path).await {
            Ok(Some(context)) => context,
            Ok(None) => return Vec::new(),
            Err(error) => {
                warn!(file = %file_path, %error, "Failed to read file from branch");
                return Vec::new();
            }
        };
        let context2 = match self.context_for(branch2, file_path).await {
            Ok(Some(context)) => context,
            Ok(None) => return Vec::new(),
            Err(error) => {
                warn!(file = %file_path, %error, "Failed to read file from branch");
                return Vec::new();
            }
        };

        self.diff_contexts(&context1, &context2, branch1, branch2, file_path)
    }

    /// Pure structural diff of two contexts. Exposed so consumers can
    /// analyze content that never touched git.
    pub fn diff_contexts(
        &self,
        context1: &SemanticContext,
        context2: &SemanticContext,
        branch1: &str,
        branch2: &str,
        file_path: &str,
    ) -> Vec<SemanticConflict> {
        let mut conflicts = Vec::new();
        self.detect_function_conflicts(context1, context2, branch1, branch2, file_path, &mut conflicts);
        self.detect_class_conflicts(context1, context2, branch1, branch2, file_path, &mut conflicts);
        self.detect_import_conflicts(context1, context2, branch1, branch2, file_path, &mut conflicts);
        self.detect_variable_conflicts(context1, context2, branch1, branch2, file_path, &mut conflicts);
        conflicts
    }

    async fn shared_changed_files(&self, branch1: &str, branch2: &str) -> Result<Vec<String>> {
        let files1 = self.git.changed_files(branch1).await?;
        let files2 = self.git.changed_files(branch2).await?;

        let shared: BTreeSet<String> = files1
            .keys()
            .filter(|path| files2.contains_key(*path))
            .filter(|path| self.parser.handles(path))
            .cloned()
            .collect();
        Ok(shared.into_iter().collect())
    }

    fn conflict_id(
        kind: SemanticConflictKind,
        branch1: &str,
        branch2: &str,
        file_path: &str,
        symbol: &str,
    ) -> String {
        format!("{}:{branch1}:{branch2}:{file_path}:{symbol}", kind.slug())
    }

    fn detect_function_conflicts(
        &self,
        context1: &SemanticContext,
        context2: &SemanticContext,
        branch1: &str,
        branch2: &str,
        file_path: &str,
        conflicts: &mut Vec<SemanticConflict>,
    ) {
        for (name, func1) in &context1.functions {
            if let Some(func2) = context2.functions.get(name) {
                if self.signatures_conflict(func1, func2) {
                    let impact = analyze_function_impact(func1, func2);
                    conflicts.push(SemanticConflict {
                        id: Self::conflict_id(
                            SemanticConflictKind::FunctionSignatureChange,
                            branch1,
                            branch2,
                            file_path,
                            name,
                        ),
                        kind: SemanticConflictKind::FunctionSignatureChange,
                        severity: assess_signature_severity(func1, func2),
                        symbol_name: name.clone(),
                        file_path: file_path.to_string(),
                        branch1: branch1.to_string(),
                        branch2: branch2.to_string(),
                        description: format!("Function signature conflict in {name}"),
                        old_definition: Some(func1.render()),
                        new_definition: Some(func2.render()),
                        suggested_resolution: suggest_function_resolution(&impact),
                        impact,
                        detected_at: Utc::now(),
                    });
                }
            } else if func1.visibility().is_public() || self.config.check_private_members {
                // Deleted on the second branch; callers elsewhere break.
                conflicts.push(SemanticConflict {
                    id: Self::conflict_id(
                        SemanticConflictKind::ApiBreakingChange,
                        branch1,
                        branch2,
                        file_path,
                        name,
                    ),
                    kind: SemanticConflictKind::ApiBreakingChange,
                    severity: ConflictSeverity::High,
                    symbol_name: name.clone(),
                    file_path: file_path.to_string(),
                    branch1: branch1.to_string(),
                    branch2: branch2.to_string(),
                    description: format!("Function {name} deleted in {branch2}"),
                    old_definition: Some(func1.render()),
                    new_definition: None,
                    impact: ImpactAnalysis {
                        breaking_change: true,
                        ..Default::default()
                    },
                    suggested_resolution: ResolutionStrategy::HumanRequired,
                    detected_at: Utc::now(),
                });
            }
        }
    }

    fn detect_class_conflicts(
        &self,
        context1: &SemanticContext,
        context2: &SemanticContext,
        branch1: &str,
        branch2: &str,
        file_path: &str,
        conflicts: &mut Vec<SemanticConflict>,
    ) {
        for (name, class1) in &context1.classes {
            let Some(class2) = context2.classes.get(name) else {
                continue;
            };

            if class1.bases != class2.bases {
                conflicts.push(SemanticConflict {
                    id: Self::conflict_id(
                        SemanticConflictKind::InheritanceConflict,
                        branch1,
                        branch2,
                        file_path,
                        name,
                    ),
                    kind: SemanticConflictKind::InheritanceConflict,
                    severity: ConflictSeverity::High,
                    symbol_name: name.clone(),
                    file_path: file_path.to_string(),
                    branch1: branch1.to_string(),
                    branch2: branch2.to_string(),
                    description: format!("Class inheritance conflict in {name}"),
                    old_definition: Some(render_class_header(class1)),
                    new_definition: Some(render_class_header(class2)),
                    impact: ImpactAnalysis::default(),
                    suggested_resolution: ResolutionStrategy::HumanRequired,
                    detected_at: Utc::now(),
                });
            }

            for (method_name, method1) in &class1.methods {
                let Some(method2) = class2.methods.get(method_name) else {
                    continue;
                };
                if self.signatures_conflict(method1, method2) {
                    let symbol = format!("{name}.{method_name}");
                    let impact = analyze_function_impact(method1, method2);
                    conflicts.push(SemanticConflict {
                        id: Self::conflict_id(
                            SemanticConflictKind::ClassInterfaceChange,
                            branch1,
                            branch2,
                            file_path,
                            &symbol,
                        ),
                        kind: SemanticConflictKind::ClassInterfaceChange,
                        severity: assess_signature_severity(method1, method2),
                        symbol_name: symbol.clone(),
                        file_path: file_path.to_string(),
                        branch1: branch1.to_string(),
                        branch2: branch2.to_string(),
                        description: format!("Method signature conflict in {symbol}"),
                        old_definition: Some(method1.render()),
                        new_definition: Some(method2.render()),
                        suggested_resolution: suggest_function_resolution(&impact),
                        impact,
                        detected_at: Utc::now(),
                    });
                }
            }
        }
    }

    fn detect_import_conflicts(
        &self,
        context1: &SemanticContext,
        context2: &SemanticContext,
        branch1: &str,
        branch2: &str,
        file_path: &str,
        conflicts: &mut Vec<SemanticConflict>,
    ) {
        for import1 in &context1.imports {
            let bound = import1.bound_name();
            for import2 in &context2.imports {
                if import2.bound_name() == bound && import1.module != import2.module {
                    conflicts.push(SemanticConflict {
                        id: Self::conflict_id(
                            SemanticConflictKind::ImportSemanticConflict,
                            branch1,
                            branch2,
                            file_path,
                            &bound,
                        ),
                        kind: SemanticConflictKind::ImportSemanticConflict,
                        severity: ConflictSeverity::Medium,
                        symbol_name: bound.clone(),
                        file_path: file_path.to_string(),
                        branch1: branch1.to_string(),
                        branch2: branch2.to_string(),
                        description: format!("Import name conflict for {bound}"),
                        old_definition: Some(import1.render()),
                        new_definition: Some(import2.render()),
                        impact: ImpactAnalysis::default(),
                        suggested_resolution: ResolutionStrategy::CustomMerge,
                        detected_at: Utc::now(),
                    });
                    break;
                }
            }
        }
    }

    fn detect_variable_conflicts(
        &self,
        context1: &SemanticContext,
        context2: &SemanticContext,
        branch1: &str,
        branch2: &str,
        file_path: &str,
        conflicts: &mut Vec<SemanticConflict>,
    ) {
        for (name, type1) in &context1.global_variables {
            let Some(type2) = context2.global_variables.get(name) else {
                continue;
            };
            if type1 != type2 {
                conflicts.push(SemanticConflict {
                    id: Self::conflict_id(
                        SemanticConflictKind::VariableTypeConflict,
                        branch1,
                        branch2,
                        file_path,
                        name,
                    ),
                    kind: SemanticConflictKind::VariableTypeConflict,
                    severity: ConflictSeverity::Medium,
                    symbol_name: name.clone(),
                    file_path: file_path.to_string(),
                    branch1: branch1.to_string(),
                    branch2: branch2.to_string(),
                    description: format!("Variable type conflict for {name}"),
                    old_definition: Some(format!("{name}: {type1}")),
                    new_definition: Some(format!("{name}: {type2}")),
                    impact: ImpactAnalysis::default(),
                    suggested_resolution: ResolutionStrategy::SemanticAnalysis,
                    detected_at: Utc::now(),
                });
            }
        }
    }

    fn signatures_conflict(&self, func1: &FunctionSignature, func2: &FunctionSignature) -> bool {
        if func1.args != func2.args
            || func1.defaults != func2.defaults
            || func1.kwonly_args != func2.kwonly_args
        {
            return true;
        }
        if self.config.check_type_hints && func1.return_type != func2.return_type {
            return true;
        }
        func1.decorators != func2.decorators
    }

    pub fn get_analysis_summary(&self) -> AnalysisSummary {
        let mut summary = self.stats.lock().unwrap().clone();
        summary.cache_size = self.contexts.entry_count();
        summary
    }
}

fn render_class_header(class: &ClassDefinition) -> String {
    if class.bases.is_empty() {
        format!("class {}", class.name)
    } else {
        format!("class {}({})", class.name, class.bases.join(", "))
    }
}

/// Replaceable severity policy: breaking parameter changes on public
/// symbols rank high, everything private stays low.
pub(crate) fn assess_signature_severity(
    func1: &FunctionSignature,
    func2: &FunctionSignature,
) -> ConflictSeverity {
    if func1.visibility().is_public() {
        if func1.args.len() > func2.args.len() {
            return ConflictSeverity::High;
        }
        if func1.args.len() < func2.args.len() && func1.defaults.len() == func2.defaults.len() {
            return ConflictSeverity::High;
        }
        if func1.return_type != func2.return_type {
            return ConflictSeverity::Medium;
        }
        if func1.decorators != func2.decorators {
            return ConflictSeverity::Medium;
        }
    }
    ConflictSeverity::Low
}

pub(crate) fn analyze_function_impact(
    func1: &FunctionSignature,
    func2: &FunctionSignature,
) -> ImpactAnalysis {
    let mut impact = ImpactAnalysis {
        return_type_change: func1.return_type != func2.return_type,
        decorator_changes: func1.decorators != func2.decorators,
        ..Default::default()
    };

    if func1.args.len() > func2.args.len() {
        impact.breaking_change = true;
        let removed = &func1.args[func2.args.len()..];
        impact
            .parameter_changes
            .push(format!("Removed parameters: {}", removed.join(", ")));
    }

    if func1.args.len() < func2.args.len() {
        let added = &func2.args[func1.args.len()..];
        if func2.defaults.len() < added.len() {
            impact.breaking_change = true;
        }
        impact
            .parameter_changes
            .push(format!("Added parameters: {}", added.join(", ")));
    }

    impact
}

fn suggest_function_resolution(impact: &ImpactAnalysis) -> ResolutionStrategy {
    if impact.breaking_change {
        ResolutionStrategy::HumanRequired
    } else {
        ResolutionStrategy::SemanticAnalysis
    }
}
