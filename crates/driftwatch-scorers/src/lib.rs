use std::path::Path;
use std::sync::Arc;

use driftwatch_core::catalog::{CatalogFile, PromptCatalog, PromptDefinition, ScoringSpec};
use driftwatch_core::errors::CatalogError;
use driftwatch_core::scoring_api::Scorer;

mod exact_match;
mod json_schema;
mod must_contain;
mod must_not_contain;
mod regex_match;

pub use exact_match::ExactMatchScorer;
pub use json_schema::JsonSchemaScorer;
pub use must_contain::MustContainScorer;
pub use must_not_contain::MustNotContainScorer;
pub use regex_match::RegexMatchScorer;

pub const DEFAULT_SUITE_VERSION: &str = "2025.1";

pub fn build_scorer(spec: &ScoringSpec) -> anyhow::Result<Arc<dyn Scorer>> {
    let scorer: Arc<dyn Scorer> = match spec {
        ScoringSpec::MustContain {
            must_contain,
            case_insensitive,
        } => Arc::new(MustContainScorer::new(
            must_contain.clone(),
            *case_insensitive,
        )?),
        ScoringSpec::MustNotContain { must_not_contain } => {
            Arc::new(MustNotContainScorer::new(must_not_contain.clone())?)
        }
        ScoringSpec::RegexMatch { pattern, flags } => {
            Arc::new(RegexMatchScorer::new(pattern, flags)?)
        }
        ScoringSpec::JsonSchema { json_schema } => Arc::new(JsonSchemaScorer::new(json_schema)?),
        ScoringSpec::ExactMatch {
            expected,
            case_insensitive,
        } => Arc::new(ExactMatchScorer::new(expected, *case_insensitive)),
    };
    Ok(scorer)
}

/// Loads a YAML catalog file and resolves its scoring rules.
pub fn load_catalog(path: &Path) -> Result<PromptCatalog, CatalogError> {
    CatalogFile::load(path)?.into_catalog(build_scorer)
}

/// The built-in battery: four short correctness checks and one long-form
/// throughput prompt.
pub fn default_catalog() -> anyhow::Result<PromptCatalog> {
    let palindrome = RegexMatchScorer::new(
        r"def\s+is_palindrome\s*\([^)]*\)\s*(->\s*bool\s*)?:",
        &["m".to_string()],
    )?;
    let extraction = JsonSchemaScorer::new(&serde_json::json!({
        "type": "object",
        "required": ["name", "city", "year"],
        "properties": {
            "name": {"type": "string", "pattern": "^Ada Lovelace$"},
            "city": {"type": "string", "pattern": "^London$"},
            "year": {"type": "integer", "const": 1843}
        }
    }))?;
    let arithmetic = RegexMatchScorer::new(r"\b391\b", &[])?;

    let prompts = vec![
        PromptDefinition::correctness(
            "P1",
            "Python palindrome function",
            "1",
            "Write a Python function named is_palindrome(s) that returns True if the string s \
             reads the same forwards and backwards, ignoring case. Return only the code.",
            2,
            Arc::new(palindrome),
        ),
        PromptDefinition::correctness(
            "P2",
            "Structured extraction",
            "1",
            "Extract the person's name, city and year from this sentence and answer with only a \
             JSON object with keys name, city and year: \"In 1843, Ada Lovelace published her \
             notes in London.\"",
            1,
            Arc::new(extraction),
        ),
        PromptDefinition::correctness(
            "P3",
            "Arithmetic",
            "1",
            "What is 17 * 23? Answer with only the number.",
            1,
            Arc::new(arithmetic),
        ),
        PromptDefinition::correctness(
            "P4",
            "Instruction following",
            "1",
            "Reply with exactly the word OK and nothing else.",
            1,
            Arc::new(ExactMatchScorer::new("OK", false)),
        ),
        PromptDefinition::performance(
            "P5",
            "Long-form throughput",
            "1",
            "Write a detailed, roughly 800-word essay on the history of the printing press and \
             its effects on European society.",
            3,
        ),
    ];

    Ok(PromptCatalog::new(DEFAULT_SUITE_VERSION, prompts)?)
}
