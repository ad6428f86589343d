mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use common::GitFixture;
use polymerge::analysis::{PythonParser, SemanticAnalyzer};
use polymerge::collaboration::{CollaborationEngine, FixedDirectory, MessageType};
use polymerge::config::{
    AnalysisConfig, CollaborationConfig, MergeConfig, PredictionConfig, PreventionConfig,
};
use polymerge::git::{BranchManager, GitClient};
use polymerge::prediction::{ConflictPredictor, ConflictPreventionSystem};
use polymerge::resolution::{AutoResolver, ConflictResolutionEngine, SemanticMerger};

struct Harness {
    system: Arc<ConflictPreventionSystem>,
    collaboration: Arc<CollaborationEngine>,
}

fn harness(repo: &std::path::Path) -> Harness {
    let git = GitClient::new(repo);
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
    let branches = Arc::new(BranchManager::new(git, "feat/agents", ".polymerge"));
    let system = Arc::new(ConflictPreventionSystem::new(
        predictor,
        resolver,
        Arc::clone(&collaboration),
        branches,
        PreventionConfig::default(),
    ));
    Harness {
        system,
        collaboration,
    }
}

fn import_block(modules: &[&str]) -> String {
    let mut block: Vec<String> = modules.iter().map(|m| format!("import {m}")).collect();
    block.push(String::new());
    block.push("value = 1".to_string());
    block.push(String::new());
    block.join("\n")
}

#[tokio::test]
async fn significant_predictions_become_applied_measures() {
    let fixture = GitFixture::new();
    fixture.write("app.py", &import_block(&["os"]));
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    let shared = ["os", "sys", "json", "re", "io"];
    fixture.create_branch("branch-a", "main");
    let mut modules_a: Vec<&str> = shared.to_vec();
    modules_a.push("abc");
    fixture.write("app.py", &import_block(&modules_a));
    fixture.commit_all("a imports");
    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    let mut modules_b: Vec<&str> = shared.to_vec();
    modules_b.extend(["csv", "gzip", "hashlib", "math"]);
    fixture.write("app.py", &import_block(&modules_b));
    fixture.commit_all("b imports");
    fixture.checkout("main");

    let harness = harness(&fixture.repo);
    let result = harness
        .system
        .analyze_and_prevent_conflicts(
            &["branch-a".to_string(), "branch-b".to_string()],
            None,
            Some(vec!["agent-1".to_string()]),
        )
        .await
        .unwrap();

    assert!(result.predictions_found >= 1);
    assert!(result.measures_applied >= 1);
    assert_eq!(result.conflicts_prevented, result.measures_applied);
    assert_eq!(
        result.time_saved_hours,
        result.conflicts_prevented as f64 * 2.0
    );

    // The dependency-sync measure messaged the targeted agent.
    let inbox = harness.collaboration.receive_messages("agent-1", None).await;
    assert!(inbox
        .iter()
        .any(|message| message.message_type == MessageType::DependencyChange));

    let summary = harness.system.get_prevention_summary().await;
    assert_eq!(summary.sessions, 1);
    assert!(summary.stats.measures_applied >= 1);
}

#[tokio::test]
async fn quiet_branches_produce_no_measures() {
    let fixture = GitFixture::new();
    fixture.write("a.py", "a = 1\n");
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    fixture.create_branch("branch-a", "main");
    fixture.write("only_a.py", "x = 1\n");
    fixture.commit_all("a");
    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write("only_b.py", "y = 2\n");
    fixture.commit_all("b");
    fixture.checkout("main");

    let harness = harness(&fixture.repo);
    let result = harness
        .system
        .analyze_and_prevent_conflicts(&["branch-a".to_string(), "branch-b".to_string()], None, None)
        .await
        .unwrap();

    assert_eq!(result.measures_applied, 0);
    assert_eq!(result.conflicts_prevented, 0);
}

#[tokio::test]
async fn monitoring_starts_and_stops_cleanly() {
    let fixture = GitFixture::new();
    let harness = harness(&fixture.repo);

    harness
        .system
        .start_monitoring(Some(StdDuration::from_millis(200)))
        .await;
    assert!(harness.system.is_monitoring());

    tokio::time::sleep(StdDuration::from_millis(500)).await;
    harness.system.stop_monitoring().await;
    assert!(!harness.system.is_monitoring());
}
