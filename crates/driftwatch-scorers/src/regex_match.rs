use driftwatch_core::scoring_api::{ScoreResult, Scorer};
use regex::{Regex, RegexBuilder};

pub struct RegexMatchScorer {
    re: Regex,
}

impl RegexMatchScorer {
    pub fn new(pattern: &str, flags: &[String]) -> anyhow::Result<Self> {
        let mut b = RegexBuilder::new(pattern);
        apply_flags(&mut b, flags);
        let re = b.build().map_err(|e| {
            anyhow::anyhow!("config error: invalid regex pattern '{}': {}", pattern, e)
        })?;
        Ok(Self { re })
    }
}

impl Scorer for RegexMatchScorer {
    fn name(&self) -> &'static str {
        "regex_match"
    }

    fn score(&self, output: &str) -> ScoreResult {
        if self.re.is_match(output) {
            ScoreResult::pass()
        } else {
            ScoreResult::fail(&format!(
                "regex_match failed: pattern '{}' did not match",
                self.re.as_str()
            ))
        }
    }
}

fn apply_flags(b: &mut RegexBuilder, flags: &[String]) {
    for f in flags {
        match f.as_str() {
            "i" => {
                b.case_insensitive(true);
            }
            "m" => {
                b.multi_line(true);
            }
            "s" => {
                b.dot_matches_new_line(true);
            }
            other => tracing::warn!(flag = other, "ignoring unknown regex flag"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_boundary_match() {
        let s = RegexMatchScorer::new(r"\b391\b", &[]).unwrap();
        assert!(s.score("17 * 23 = 391").passed);
        assert!(!s.score("3910").passed);
    }

    #[test]
    fn flags_apply() {
        let s = RegexMatchScorer::new(r"^def is_palindrome", &["m".into(), "i".into()]).unwrap();
        assert!(s.score("Here you go:\nDEF is_palindrome(s):").passed);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = RegexMatchScorer::new("(", &[]).err().unwrap();
        assert!(err.to_string().contains("invalid regex pattern"));
    }
}
