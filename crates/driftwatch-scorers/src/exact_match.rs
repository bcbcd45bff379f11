use driftwatch_core::scoring_api::{ScoreResult, Scorer};

/// Whole-output equality after trimming surrounding whitespace.
pub struct ExactMatchScorer {
    expected: String,
    case_insensitive: bool,
}

impl ExactMatchScorer {
    pub fn new(expected: &str, case_insensitive: bool) -> Self {
        Self {
            expected: expected.trim().to_string(),
            case_insensitive,
        }
    }
}

impl Scorer for ExactMatchScorer {
    fn name(&self) -> &'static str {
        "exact_match"
    }

    fn score(&self, output: &str) -> ScoreResult {
        let got = output.trim();
        let ok = if self.case_insensitive {
            got.to_lowercase() == self.expected.to_lowercase()
        } else {
            got == self.expected
        };
        if ok {
            ScoreResult::pass()
        } else {
            ScoreResult::fail(&format!("expected '{}'", self.expected))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_but_compares_exactly() {
        let s = ExactMatchScorer::new("OK", false);
        assert!(s.score(" OK\n").passed);
        assert!(!s.score("OK.").passed);
        assert!(!s.score("ok").passed);
        assert!(ExactMatchScorer::new("OK", true).score("ok").passed);
    }
}
