mod common;

use std::sync::Arc;

use common::GitFixture;
use polymerge::analysis::{PythonParser, SemanticAnalyzer};
use polymerge::config::{AnalysisConfig, PredictionConfig};
use polymerge::git::GitClient;
use polymerge::prediction::{ConflictPattern, ConflictPredictor};

fn predictor_for(repo: &std::path::Path, config: PredictionConfig) -> ConflictPredictor {
    let git = GitClient::new(repo);
    let analyzer = Arc::new(SemanticAnalyzer::new(
        git.clone(),
        Arc::new(PythonParser::with_fallback()),
        AnalysisConfig::default(),
    ));
    ConflictPredictor::new(git, analyzer, config)
}

fn import_block(modules: &[&str]) -> String {
    let mut block: Vec<String> = modules.iter().map(|m| format!("import {m}")).collect();
    block.push(String::new());
    block.push("value = 1".to_string());
    block.push(String::new());
    block.join("\n")
}

#[tokio::test]
async fn overlapping_import_sets_are_predicted() {
    let fixture = GitFixture::new();
    fixture.write("app.py", &import_block(&["os"]));
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    // 6 imports on one branch, 9 on the other, 5 shared.
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

    let predictor = predictor_for(&fixture.repo, PredictionConfig::default());
    let predictions = predictor
        .predict_conflicts(&["branch-a".to_string(), "branch-b".to_string()], None)
        .await
        .unwrap();

    let import_prediction = predictions
        .iter()
        .find(|prediction| prediction.pattern == ConflictPattern::OverlappingImports)
        .expect("overlapping_imports prediction");
    assert!(import_prediction.likelihood_score > 0.3);
    assert!(import_prediction.affected_files.contains(&"app.py".to_string()));
}

#[tokio::test]
async fn likelihood_scores_stay_in_the_unit_interval() {
    let fixture = GitFixture::new();
    fixture.write("app.py", "def handle(a):\n    return a\n");
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    fixture.create_branch("branch-a", "main");
    fixture.write(
        "app.py",
        "import os\nimport sys\n\ndef handle(a, b, c, d):\n    return a\n\nclass W(A, B):\n    pass\n",
    );
    fixture.write("requirements.txt", "requests==2.31.0\n");
    fixture.commit_all("a rewrite");

    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write(
        "app.py",
        "import os\nimport json\n\ndef handle(x):\n    return x\n\nclass W(C):\n    pass\n",
    );
    fixture.write("requirements.txt", "requests==1.0.0\n");
    fixture.commit_all("b rewrite");
    fixture.checkout("main");

    let config = PredictionConfig {
        min_confidence: 0.0,
        ..PredictionConfig::default()
    };
    let predictor = predictor_for(&fixture.repo, config);
    let predictions = predictor
        .predict_conflicts(&["branch-a".to_string(), "branch-b".to_string()], None)
        .await
        .unwrap();

    assert!(!predictions.is_empty());
    for prediction in &predictions {
        assert!(
            (0.0..=1.0).contains(&prediction.likelihood_score),
            "{} out of range: {}",
            prediction.id,
            prediction.likelihood_score
        );
    }

    // Ranked by likelihood descending.
    for window in predictions.windows(2) {
        assert!(window[0].likelihood_score >= window[1].likelihood_score);
    }
}

#[tokio::test]
async fn floor_and_cap_bound_the_prediction_set() {
    let fixture = GitFixture::new();
    fixture.write("app.py", "def handle(a):\n    return a\n");
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    fixture.create_branch("branch-a", "main");
    fixture.write("app.py", "def handle(a, b):\n    return a\n");
    fixture.commit_all("a edit");
    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write("app.py", "def handle(a, c):\n    return a\n");
    fixture.commit_all("b edit");
    fixture.checkout("main");

    // An impossible floor filters everything out.
    let strict = predictor_for(
        &fixture.repo,
        PredictionConfig {
            min_confidence: 1.1,
            ..PredictionConfig::default()
        },
    );
    let none = strict
        .predict_conflicts(&["branch-a".to_string(), "branch-b".to_string()], None)
        .await
        .unwrap();
    assert!(none.is_empty());

    // A cap of one keeps only the most likely prediction.
    let capped = predictor_for(
        &fixture.repo,
        PredictionConfig {
            min_confidence: 0.0,
            max_predictions: 1,
            ..PredictionConfig::default()
        },
    );
    let one = capped
        .predict_conflicts(&["branch-a".to_string(), "branch-b".to_string()], None)
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
}

#[tokio::test]
async fn recorded_outcomes_rescale_future_likelihoods() {
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

    let predictor = predictor_for(
        &fixture.repo,
        PredictionConfig {
            min_confidence: 0.0,
            ..PredictionConfig::default()
        },
    );
    let branches = ["branch-a".to_string(), "branch-b".to_string()];

    let first = predictor.predict_conflicts(&branches, None).await.unwrap();
    let baseline = first
        .iter()
        .find(|p| p.pattern == ConflictPattern::OverlappingImports)
        .unwrap()
        .likelihood_score;

    // Every graded outcome was wrong, so the pattern's likelihood halves.
    predictor
        .record_prediction_outcome(
            &format!("{}:branch-a:branch-b", ConflictPattern::OverlappingImports.slug()),
            false,
        )
        .await;

    let second = predictor.predict_conflicts(&branches, None).await.unwrap();
    let rescaled = second
        .iter()
        .find(|p| p.pattern == ConflictPattern::OverlappingImports)
        .unwrap()
        .likelihood_score;

    assert!((rescaled - baseline * 0.5).abs() < 1e-9);

    let summary = predictor.get_prediction_summary().await;
    assert!(summary.total_predictions > 0);
    assert!(summary.stats.false_positives >= 1);
}
