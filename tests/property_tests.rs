use polymerge::git::BranchManager;
use polymerge::prediction::PredictionConfidence;
use proptest::prelude::*;

proptest! {
    #[test]
    fn sanitized_names_fit_the_branch_slug_grammar(input in ".{0,64}") {
        let slug = BranchManager::sanitize_issue_name(&input);
        prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        prop_assert!(!slug.contains("--"));
        prop_assert!(!slug.starts_with('-'));
        prop_assert!(!slug.ends_with('-'));
    }

    #[test]
    fn sanitization_is_idempotent(input in ".{0,64}") {
        let once = BranchManager::sanitize_issue_name(&input);
        let twice = BranchManager::sanitize_issue_name(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn confidence_bands_are_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let rank = |c: PredictionConfidence| match c {
            PredictionConfidence::Low => 0,
            PredictionConfidence::Medium => 1,
            PredictionConfidence::High => 2,
            PredictionConfidence::Critical => 3,
        };
        prop_assert!(
            rank(PredictionConfidence::from_likelihood(low))
                <= rank(PredictionConfidence::from_likelihood(high))
        );
    }
}
