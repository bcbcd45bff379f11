use driftwatch_core::scoring_api::{ScoreResult, Scorer};

pub struct MustNotContainScorer {
    forbidden: Vec<String>,
}

impl MustNotContainScorer {
    pub fn new(forbidden: Vec<String>) -> anyhow::Result<Self> {
        if forbidden.is_empty() {
            anyhow::bail!("config error: must_not_contain needs at least one substring");
        }
        Ok(Self { forbidden })
    }
}

impl Scorer for MustNotContainScorer {
    fn name(&self) -> &'static str {
        "must_not_contain"
    }

    fn score(&self, output: &str) -> ScoreResult {
        for s in &self.forbidden {
            if output.contains(s.as_str()) {
                return ScoreResult::fail(&format!("forbidden substring present: {}", s));
            }
        }
        ScoreResult::pass()
    }
}
