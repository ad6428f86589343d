mod common;

use std::sync::Arc;

use common::GitFixture;
use polymerge::analysis::{PythonParser, SemanticAnalyzer};
use polymerge::config::{AnalysisConfig, MergeConfig, PredictionConfig};
use polymerge::git::GitClient;
use polymerge::prediction::ConflictPredictor;
use polymerge::resolution::{
    AutoResolutionMode, AutoResolver, ConflictResolutionEngine, ResolutionOutcome, SemanticMerger,
};

fn resolver_for(repo: &std::path::Path) -> AutoResolver {
    let git = GitClient::new(repo);
    let analyzer = Arc::new(SemanticAnalyzer::new(
        git.clone(),
        Arc::new(PythonParser::with_fallback()),
        AnalysisConfig::default(),
    ));
    let merger = Arc::new(SemanticMerger::new(
        Arc::clone(&analyzer),
        git.clone(),
        MergeConfig::default(),
    ));
    let engine = Arc::new(ConflictResolutionEngine::new(git.clone()));
    let predictor = Arc::new(ConflictPredictor::new(
        git.clone(),
        Arc::clone(&analyzer),
        PredictionConfig::default(),
    ));
    AutoResolver::new(analyzer, merger, engine, predictor, git)
}

#[tokio::test]
async fn conflict_free_branches_resolve_fully_with_max_confidence() {
    let fixture = GitFixture::new();
    fixture.write("app.py", "value = 1\n");
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    fixture.create_branch("branch-a", "main");
    fixture.write("a.py", "a = 1\n");
    fixture.commit_all("a adds file");
    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write("b.py", "b = 2\n");
    fixture.commit_all("b adds file");
    fixture.checkout("main");

    let resolver = resolver_for(&fixture.repo);
    let result = resolver
        .auto_resolve_branch_conflicts("branch-a", "branch-b", None, None)
        .await;

    assert_eq!(result.outcome, ResolutionOutcome::FullyResolved);
    assert_eq!(result.conflicts_detected, 0);
    assert_eq!(result.confidence_score, 1.0);
}

#[tokio::test]
async fn import_collision_is_merged_and_applied_to_the_target_branch() {
    let fixture = GitFixture::new();
    fixture.write("app.py", "from json import loads\n\nvalue = 1\n");
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    fixture.create_branch("branch-a", "main");
    fixture.write("app.py", "from json import loads\n\nvalue = 1\nextra_a = 2\n");
    fixture.commit_all("a extends");
    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write("app.py", "from simplejson import loads\n\nvalue = 1\n");
    fixture.commit_all("b swaps the import");
    fixture.checkout("main");

    let resolver = resolver_for(&fixture.repo);
    let result = resolver
        .auto_resolve_branch_conflicts(
            "branch-a",
            "branch-b",
            None,
            Some(AutoResolutionMode::Balanced),
        )
        .await;

    assert_eq!(result.outcome, ResolutionOutcome::FullyResolved);
    assert_eq!(result.conflicts_detected, 1);
    assert_eq!(result.conflicts_resolved, 1);
    assert!(result.semantic_integrity_preserved);
    assert!(result.confidence_score >= 0.7);

    // The merge landed in branch-a's working tree with both imports.
    let applied = std::fs::read_to_string(fixture.repo.join("app.py")).unwrap();
    assert!(applied.contains("from json import loads"));
    assert!(applied.contains("from simplejson import loads"));
}

#[tokio::test]
async fn breaking_changes_escalate_in_balanced_mode() {
    let fixture = GitFixture::new();
    fixture.write("app.py", "from json import loads\n\nvalue = 1\n");
    fixture.write("util.py", "def keep(a):\n    return a\n\ndef gone(b):\n    return b\n");
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    fixture.create_branch("branch-a", "main");
    fixture.write("app.py", "from json import loads\n\nvalue = 1\nextra = 2\n");
    fixture.write("util.py", "def keep(a):\n    return a\n\ndef gone(b):\n    return b\n\nmarker_a = 1\n");
    fixture.commit_all("a extends");
    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write("app.py", "from simplejson import loads\n\nvalue = 1\n");
    // branch-b deletes a public function other callers rely on.
    fixture.write("util.py", "def keep(a):\n    return a\n");
    fixture.commit_all("b deletes gone()");
    fixture.checkout("main");

    let resolver = resolver_for(&fixture.repo);
    let result = resolver
        .auto_resolve_branch_conflicts(
            "branch-a",
            "branch-b",
            None,
            Some(AutoResolutionMode::Balanced),
        )
        .await;

    assert_eq!(result.conflicts_detected, 2);
    assert_eq!(result.outcome, ResolutionOutcome::PartiallyResolved);
    assert_eq!(result.escalated_conflicts.len(), 1);
    assert!(result.escalated_conflicts[0].contains("gone"));

    // Session statistics accumulated.
    let stats = resolver.get_resolution_stats();
    assert_eq!(stats.total_sessions, 1);
    assert_eq!(stats.successful_resolutions, 1);
}

#[tokio::test]
async fn conservative_mode_escalates_what_balanced_accepts() {
    let fixture = GitFixture::new();
    fixture.write("app.py", "from json import loads\n\nvalue = 1\n");
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    fixture.create_branch("branch-a", "main");
    fixture.write("app.py", "from json import loads\n\nvalue = 1\nextra = 2\n");
    fixture.commit_all("a extends");
    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write("app.py", "from simplejson import loads\n\nvalue = 1\n");
    fixture.commit_all("b swaps");
    fixture.checkout("main");

    let resolver = resolver_for(&fixture.repo);
    let result = resolver
        .auto_resolve_branch_conflicts(
            "branch-a",
            "branch-b",
            None,
            Some(AutoResolutionMode::Conservative),
        )
        .await;

    // Medium-severity import collision is beyond conservative policy.
    assert_eq!(result.outcome, ResolutionOutcome::EscalatedToHuman);
    assert_eq!(result.escalated_conflicts.len(), 1);
}
