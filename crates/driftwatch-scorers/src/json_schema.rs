use driftwatch_core::scoring_api::{ScoreResult, Scorer};
use jsonschema::JSONSchema;

pub struct JsonSchemaScorer {
    compiled: JSONSchema,
}

impl JsonSchemaScorer {
    pub fn new(schema: &serde_json::Value) -> anyhow::Result<Self> {
        let compiled = JSONSchema::options()
            .compile(schema)
            .map_err(|e| anyhow::anyhow!("config error: schema compile failed: {}", e))?;
        Ok(Self { compiled })
    }
}

/// Models often wrap JSON in a markdown fence; take what is inside it.
fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

impl Scorer for JsonSchemaScorer {
    fn name(&self) -> &'static str {
        "json_schema"
    }

    fn score(&self, output: &str) -> ScoreResult {
        let instance: serde_json::Value = match serde_json::from_str(strip_fences(output)) {
            Ok(v) => v,
            Err(_) => return ScoreResult::fail("json_schema failed: response is not valid JSON"),
        };
        let result = self.compiled.validate(&instance);
        match result {
            Ok(()) => ScoreResult::pass(),
            Err(errors) => {
                let error_list: Vec<String> = errors.map(|e| e.to_string()).collect();
                ScoreResult::fail(&format!(
                    "json_schema failed: {} validation errors: {}",
                    error_list.len(),
                    error_list.join("; ")
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> JsonSchemaScorer {
        JsonSchemaScorer::new(&json!({
            "type": "object",
            "required": ["name", "age"],
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn accepts_valid_and_fenced_json() {
        let s = person();
        assert!(s.score(r#"{"name":"Ada","age":36}"#).passed);
        assert!(s.score("```json\n{\"name\":\"Ada\",\"age\":36}\n```").passed);
    }

    #[test]
    fn invalid_json_scores_zero() {
        let r = person().score("name: Ada");
        assert_eq!(r.value(), 0);
        assert!(r.reason.unwrap().contains("not valid JSON"));
    }

    #[test]
    fn schema_violation_scores_zero() {
        assert!(!person().score(r#"{"name":"Ada","age":"thirty"}"#).passed);
    }

    #[test]
    fn strip_fences_variants() {
        assert_eq!(strip_fences("  {}  "), "{}");
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_fences("```json\n[1]\n```\n"), "[1]");
    }
}
