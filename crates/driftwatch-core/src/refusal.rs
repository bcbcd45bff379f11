use regex::Regex;
use std::sync::OnceLock;

const REFUSAL_PATTERNS: &[&str] = &[
    r"\bI can(?:not|'t|’t)\b",
    r"\bI(?: am|'m|’m) (?:not able|unable) to\b",
    r"\bI won(?:'t|’t)\b",
    r"\bI(?: am|'m|’m) sorry, but\b",
    r"\bI must decline\b",
    r"\bas an AI\b",
];

fn refusal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let joined = REFUSAL_PATTERNS.join("|");
        Regex::new(&format!("(?i){}", joined)).expect("refusal patterns are valid")
    })
}

/// Heuristic: does the output contain a refusal phrase?
pub fn looks_like_refusal(output: &str) -> bool {
    refusal_regex().is_match(output)
}
