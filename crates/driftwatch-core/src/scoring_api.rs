/// Deterministic scoring capability attached to a correctness prompt.
///
/// Implementations must not panic on arbitrary model output; anything that
/// cannot be parsed scores 0.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, output: &str) -> ScoreResult;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub passed: bool,
    pub reason: Option<String>,
}

impl ScoreResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: &str) -> Self {
        Self {
            passed: false,
            reason: Some(reason.to_string()),
        }
    }

    pub fn value(&self) -> u8 {
        u8::from(self.passed)
    }
}
