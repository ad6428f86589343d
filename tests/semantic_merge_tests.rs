mod common;

use std::sync::Arc;

use common::GitFixture;
use polymerge::analysis::{PythonParser, SemanticAnalyzer};
use polymerge::config::{AnalysisConfig, MergeConfig};
use polymerge::git::GitClient;
use polymerge::resolution::{MergeResolution, MergeStrategy, SemanticMerger};

fn merger_for(repo: &std::path::Path) -> Arc<SemanticMerger> {
    let git = GitClient::new(repo);
    let analyzer = Arc::new(SemanticAnalyzer::new(
        git.clone(),
        Arc::new(PythonParser::with_fallback()),
        AnalysisConfig::default(),
    ));
    Arc::new(SemanticMerger::new(analyzer, git, MergeConfig::default()))
}

fn local_merger() -> Arc<SemanticMerger> {
    merger_for(std::path::Path::new("."))
}

#[test]
fn semantic_union_produces_sorted_deduplicated_import_union() {
    let merger = local_merger();
    let content1 = "import os\nimport sys\nimport json\nimport re\nimport io\nimport abc\n\nvalue = 1\n";
    let content2 = "import os\nimport sys\nimport json\nimport re\nimport io\nimport csv\nimport gzip\nimport hashlib\nimport math\n\nvalue = 1\n";

    let result = merger.merge_contents("mod.py", content1, content2, &[], MergeStrategy::SemanticUnion);
    let merged = result.merged_content.unwrap();

    let import_lines: Vec<&str> = merged
        .lines()
        .filter(|line| line.starts_with("import "))
        .collect();

    // Union of 6 and 9 imports sharing 5: ten distinct entries, sorted.
    assert_eq!(import_lines.len(), 10);
    let mut sorted = import_lines.clone();
    sorted.sort();
    assert_eq!(import_lines, sorted);
    for needed in ["import abc", "import csv", "import gzip", "import os"] {
        assert!(import_lines.contains(&needed), "missing {needed}");
    }
    assert!(result.semantic_integrity);
}

#[test]
fn unparsable_merge_output_loses_semantic_integrity() {
    // Strict parser, no regex fallback, so the round-trip check can fail.
    let git = GitClient::new(".");
    let analyzer = Arc::new(SemanticAnalyzer::new(
        git.clone(),
        Arc::new(PythonParser::new()),
        AnalysisConfig::default(),
    ));
    let merger = SemanticMerger::new(analyzer, git, MergeConfig::default());

    let broken = "def broken(a, b:\n    pass\n";
    let fine = "def fine(x):\n    pass\n";

    // PreferSecond claims full confidence, but the output does not parse;
    // the round-trip law forces the integrity bit off regardless.
    let result = merger.merge_contents("mod.py", fine, broken, &[], MergeStrategy::PreferSecond);
    assert_eq!(result.resolution, MergeResolution::AutoResolved);
    assert_eq!(result.merge_confidence, 1.0);
    assert!(!result.semantic_integrity);

    let ok = merger.merge_contents("mod.py", fine, fine, &[], MergeStrategy::PreferSecond);
    assert!(ok.semantic_integrity);
}

#[tokio::test]
async fn batch_merge_never_aborts_on_a_failing_file() {
    let fixture = GitFixture::new();
    fixture.write("good.py", "import os\n\nvalue = 1\n");
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    fixture.create_branch("branch-a", "main");
    fixture.write("good.py", "import os\nimport sys\n\nvalue = 1\n");
    fixture.commit_all("a edit");

    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write("good.py", "import os\nimport json\n\nvalue = 1\n");
    fixture.commit_all("b edit");
    fixture.checkout("main");

    let merger = merger_for(&fixture.repo);
    let results = merger
        .batch_merge_files(
            vec!["good.py".to_string(), "missing.py".to_string()],
            "branch-a",
            "branch-b",
            Some(2),
        )
        .await;

    assert_eq!(results.len(), 2);
    let good = results.iter().find(|r| r.file_path == "good.py").unwrap();
    assert_ne!(good.resolution, MergeResolution::MergeFailed);
    let missing = results.iter().find(|r| r.file_path == "missing.py").unwrap();
    assert_eq!(missing.resolution, MergeResolution::MergeFailed);

    let stats = merger.get_merge_stats();
    assert_eq!(stats.total_merges, 2);
}

#[tokio::test]
async fn identical_file_contents_yield_no_semantic_conflicts() {
    let fixture = GitFixture::new();
    fixture.write(
        "app.py",
        "import os\n\ndef handle(a, b=1):\n    return a\n\nclass Worker(Base):\n    def run(self):\n        pass\n",
    );
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    // Both branches touch the file with identical results.
    fixture.create_branch("branch-a", "main");
    fixture.write("app.py", "import os\n\ndef handle(a, b=2):\n    return a\n");
    fixture.commit_all("a edit");
    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write("app.py", "import os\n\ndef handle(a, b=2):\n    return a\n");
    fixture.commit_all("b edit");
    fixture.checkout("main");

    let git = GitClient::new(&fixture.repo);
    let analyzer = SemanticAnalyzer::new(
        git,
        Arc::new(PythonParser::with_fallback()),
        AnalysisConfig::default(),
    );
    let conflicts = analyzer
        .analyze_semantic_conflicts("branch-a", "branch-b", None)
        .await
        .unwrap();
    assert!(conflicts.is_empty());
}

#[tokio::test]
async fn signature_drift_between_branches_is_reported() {
    let fixture = GitFixture::new();
    fixture.write("app.py", "def handle(a):\n    return a\n");
    fixture.commit_all("base");
    fixture.git(&["push", "origin", "main"]);

    fixture.create_branch("branch-a", "main");
    fixture.write("app.py", "def handle(a, b):\n    return a\n");
    fixture.commit_all("a widens");
    fixture.checkout("main");
    fixture.create_branch("branch-b", "main");
    fixture.write("app.py", "def handle(a, c, d):\n    return a\n");
    fixture.commit_all("b widens differently");
    fixture.checkout("main");

    let git = GitClient::new(&fixture.repo);
    let analyzer = SemanticAnalyzer::new(
        git,
        Arc::new(PythonParser::with_fallback()),
        AnalysisConfig::default(),
    );
    let conflicts = analyzer
        .analyze_semantic_conflicts("branch-a", "branch-b", None)
        .await
        .unwrap();

    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].symbol_name, "handle");
    assert!(conflicts[0].old_definition.as_deref().unwrap().contains("def handle(a, b)"));
}
