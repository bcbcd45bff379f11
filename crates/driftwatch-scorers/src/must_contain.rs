use driftwatch_core::scoring_api::{ScoreResult, Scorer};

pub struct MustContainScorer {
    needles: Vec<String>,
    case_insensitive: bool,
}

impl MustContainScorer {
    pub fn new(needles: Vec<String>, case_insensitive: bool) -> anyhow::Result<Self> {
        if needles.is_empty() {
            anyhow::bail!("config error: must_contain needs at least one substring");
        }
        let needles = if case_insensitive {
            needles.into_iter().map(|s| s.to_lowercase()).collect()
        } else {
            needles
        };
        Ok(Self {
            needles,
            case_insensitive,
        })
    }
}

impl Scorer for MustContainScorer {
    fn name(&self) -> &'static str {
        "must_contain"
    }

    fn score(&self, output: &str) -> ScoreResult {
        let haystack = if self.case_insensitive {
            output.to_lowercase()
        } else {
            output.to_string()
        };
        for s in &self.needles {
            if !haystack.contains(s.as_str()) {
                return ScoreResult::fail(&format!("missing substring: {}", s));
            }
        }
        ScoreResult::pass()
    }
}
