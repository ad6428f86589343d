mod common;

use std::collections::HashMap;

use chrono::Utc;
use common::GitFixture;
use polymerge::git::GitClient;
use polymerge::resolution::{
    ConflictInfo, ConflictResolutionEngine, ConflictSeverity, ConflictType, ResolutionStrategy,
};

fn conflict(severity: ConflictSeverity, file: &str) -> ConflictInfo {
    let branches = vec!["main".to_string(), "feature".to_string()];
    ConflictInfo {
        id: ConflictInfo::make_id(ConflictType::FileModification, &branches, file),
        conflict_type: ConflictType::FileModification,
        severity,
        branches,
        files: vec![file.to_string()],
        description: format!("File conflict: {file}"),
        suggested_strategy: ResolutionStrategy::PreferMain,
        metadata: HashMap::new(),
        detected_at: Utc::now(),
        resolved_at: None,
        resolution_result: None,
    }
}

#[tokio::test]
async fn auto_resolve_all_touches_only_low_and_medium_severity() {
    let engine = ConflictResolutionEngine::new(GitClient::new("."));

    engine.register_conflict(conflict(ConflictSeverity::Low, "low.txt")).await;
    engine.register_conflict(conflict(ConflictSeverity::Medium, "medium.txt")).await;
    engine.register_conflict(conflict(ConflictSeverity::High, "high.txt")).await;
    engine.register_conflict(conflict(ConflictSeverity::Critical, "critical.txt")).await;

    let results = engine.auto_resolve_all().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| result.success));

    // High and critical conflicts remain unresolved in the summary.
    let summary = engine.get_conflict_summary().await;
    assert_eq!(summary.total_conflicts, 4);
    assert_eq!(summary.resolved_conflicts, 2);
    assert_eq!(summary.unresolved_conflicts, 2);
    assert_eq!(summary.severity_breakdown["high"], 1);
    assert_eq!(summary.severity_breakdown["critical"], 1);
}

#[tokio::test]
async fn every_attempt_lands_in_history_and_stats() {
    let engine = ConflictResolutionEngine::new(GitClient::new("."));
    let id = engine
        .register_conflict(conflict(ConflictSeverity::Low, "a.txt"))
        .await;

    let success = engine
        .resolve_conflict(&id, Some(ResolutionStrategy::PreferMain))
        .await;
    assert!(success.success);

    let failure = engine
        .resolve_conflict(&id, Some(ResolutionStrategy::CustomMerge))
        .await;
    assert!(!failure.success);

    let summary = engine.get_conflict_summary().await;
    assert_eq!(summary.stats.auto_resolved, 1);
    assert_eq!(summary.stats.human_required, 1);
    assert!((summary.stats.resolution_success_rate - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn human_required_surfaces_as_escalation_not_success() {
    let engine = ConflictResolutionEngine::new(GitClient::new("."));
    let id = engine
        .register_conflict(conflict(ConflictSeverity::High, "api.py"))
        .await;

    let result = engine
        .resolve_conflict(&id, Some(ResolutionStrategy::HumanRequired))
        .await;
    assert!(!result.success);
    assert!(result.message.contains("escalation required"));
}

#[tokio::test]
async fn semantic_strategy_prefers_wider_signature() {
    let engine = ConflictResolutionEngine::new(GitClient::new("."));
    let branches = vec!["branch-a".to_string(), "branch-b".to_string()];

    let mut metadata = HashMap::new();
    metadata.insert("function_name".to_string(), serde_json::json!("handle"));
    metadata.insert("signature1".to_string(), serde_json::json!("def handle(a):"));
    metadata.insert(
        "signature2".to_string(),
        serde_json::json!("def handle(a, b, c):"),
    );

    let semantic = ConflictInfo {
        id: ConflictInfo::make_id(ConflictType::Semantic, &branches, "app.py#handle"),
        conflict_type: ConflictType::Semantic,
        severity: ConflictSeverity::High,
        branches,
        files: vec!["app.py".to_string()],
        description: "Function signature conflict: handle".to_string(),
        suggested_strategy: ResolutionStrategy::SemanticAnalysis,
        metadata,
        detected_at: Utc::now(),
        resolved_at: None,
        resolution_result: None,
    };
    let id = engine.register_conflict(semantic).await;

    let result = engine.resolve_conflict(&id, None).await;
    assert!(result.success);
    assert_eq!(
        result.metadata["chosen_signature"],
        serde_json::json!("def handle(a, b, c):")
    );
}

#[tokio::test]
async fn detection_finds_file_and_signature_collisions_between_branches() {
    let fixture = GitFixture::new();
    fixture.write("app.py", "def handle(a):\n    return a\n");
    fixture.write("notes.md", "notes\n");
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    fixture.create_branch("branch-a", "main");
    fixture.write("app.py", "def handle(a, b):\n    return a\n");
    fixture.write("notes.md", "notes from a\n");
    fixture.commit_all("a edits");

    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write("app.py", "def handle(a, c, d):\n    return a\n");
    fixture.write("notes.md", "notes from b\n");
    fixture.commit_all("b edits");
    fixture.checkout("main");

    let engine = ConflictResolutionEngine::new(GitClient::new(&fixture.repo));
    let conflicts = engine
        .detect_potential_conflicts(&["branch-a".to_string(), "branch-b".to_string()])
        .await
        .unwrap();

    // Both files are modified on both branches.
    assert!(conflicts.iter().any(|conflict| {
        conflict.conflict_type == ConflictType::FileModification
            && conflict.files == vec!["app.py".to_string()]
    }));
    assert!(conflicts.iter().any(|conflict| {
        conflict.conflict_type == ConflictType::FileModification
            && conflict.files == vec!["notes.md".to_string()]
    }));
    // The drifting signature surfaces as a semantic conflict.
    let semantic = conflicts
        .iter()
        .find(|conflict| conflict.conflict_type == ConflictType::Semantic)
        .expect("semantic conflict");
    assert_eq!(semantic.suggested_strategy, ResolutionStrategy::HumanRequired);
    assert_eq!(semantic.severity, ConflictSeverity::High);
}

#[tokio::test]
async fn resolving_twice_with_the_same_strategy_is_stable() {
    let engine = ConflictResolutionEngine::new(GitClient::new("."));
    let id = engine
        .register_conflict(conflict(ConflictSeverity::Medium, "stable.txt"))
        .await;

    let first = engine
        .resolve_conflict(&id, Some(ResolutionStrategy::PreferMain))
        .await;
    let second = engine
        .resolve_conflict(&id, Some(ResolutionStrategy::PreferMain))
        .await;
    assert_eq!(first.success, second.success);
    assert_eq!(first.message, second.message);
}
