use crate::errors::CatalogError;
use crate::model::PromptType;
use crate::scoring_api::Scorer;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct PromptDefinition {
    pub id: String,
    pub name: String,
    pub prompt_text: String,
    /// Bumped whenever `prompt_text` changes.
    pub version: String,
    pub prompt_type: PromptType,
    pub replicate_count: u32,
    pub scorer: Option<Arc<dyn Scorer>>,
}

impl fmt::Debug for PromptDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("prompt_type", &self.prompt_type)
            .field("replicate_count", &self.replicate_count)
            .field("scorer", &self.scorer.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl PromptDefinition {
    pub fn correctness(
        id: &str,
        name: &str,
        version: &str,
        prompt_text: &str,
        replicate_count: u32,
        scorer: Arc<dyn Scorer>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            prompt_text: prompt_text.to_string(),
            version: version.to_string(),
            prompt_type: PromptType::Correctness,
            replicate_count,
            scorer: Some(scorer),
        }
    }

    pub fn performance(
        id: &str,
        name: &str,
        version: &str,
        prompt_text: &str,
        replicate_count: u32,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            prompt_text: prompt_text.to_string(),
            version: version.to_string(),
            prompt_type: PromptType::Performance,
            replicate_count,
            scorer: None,
        }
    }
}

/// The full prompt battery. Built once, never mutated; versioned as a unit.
#[derive(Debug, Clone)]
pub struct PromptCatalog {
    suite_version: String,
    prompts: Vec<PromptDefinition>,
}

impl PromptCatalog {
    pub fn new(
        suite_version: impl Into<String>,
        prompts: Vec<PromptDefinition>,
    ) -> Result<Self, CatalogError> {
        let suite_version = suite_version.into();
        if suite_version.trim().is_empty() {
            return Err(CatalogError::MissingVersion);
        }
        if prompts.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::new();
        for (i, p) in prompts.iter().enumerate() {
            if p.id.trim().is_empty() {
                return Err(CatalogError::MissingId(i));
            }
            if !seen.insert(p.id.as_str()) {
                return Err(CatalogError::DuplicateId(p.id.clone()));
            }
            if p.replicate_count == 0 {
                return Err(CatalogError::NoReplicates(p.id.clone()));
            }
        }

        Ok(Self {
            suite_version,
            prompts,
        })
    }

    pub fn suite_version(&self) -> &str {
        &self.suite_version
    }

    pub fn prompts(&self) -> &[PromptDefinition] {
        &self.prompts
    }

    pub fn get(&self, id: &str) -> Option<&PromptDefinition> {
        self.prompts.iter().find(|p| p.id == id)
    }

    pub fn correctness_count(&self) -> u32 {
        self.prompts
            .iter()
            .filter(|p| p.prompt_type == PromptType::Correctness)
            .count() as u32
    }

    pub fn total_calls(&self) -> u32 {
        self.prompts.iter().map(|p| p.replicate_count).sum()
    }
}

/// Declarative scoring rule, as written in a catalog file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ScoringSpec {
    MustContain {
        #[serde(default)]
        must_contain: Vec<String>,
        #[serde(default)]
        case_insensitive: bool,
    },
    MustNotContain {
        #[serde(default)]
        must_not_contain: Vec<String>,
    },
    RegexMatch {
        pattern: String,
        #[serde(default)]
        flags: Vec<String>,
    },
    JsonSchema {
        json_schema: serde_json::Value,
    },
    ExactMatch {
        expected: String,
        #[serde(default)]
        case_insensitive: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub suite_version: String,
    pub prompts: Vec<PromptSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSpec {
    pub id: String,
    pub name: String,
    pub prompt: String,
    #[serde(default = "default_prompt_version")]
    pub version: String,
    #[serde(rename = "type")]
    pub prompt_type: PromptType,
    #[serde(default = "default_replicates", alias = "replicates")]
    pub replicate_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring: Option<ScoringSpec>,
}

fn default_prompt_version() -> String {
    "1".to_string()
}

fn default_replicates() -> u32 {
    1
}

impl CatalogFile {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_yaml::from_str(&raw).map_err(|e| CatalogError::Parse(e.to_string()))
    }

    /// Turns the declarative file into a catalog, resolving each scoring spec
    /// through `build`.
    pub fn into_catalog<F>(self, build: F) -> Result<PromptCatalog, CatalogError>
    where
        F: Fn(&ScoringSpec) -> anyhow::Result<Arc<dyn Scorer>>,
    {
        let mut prompts = Vec::with_capacity(self.prompts.len());
        for spec in self.prompts {
            let scorer = match &spec.scoring {
                Some(s) => Some(build(s).map_err(|e| CatalogError::InvalidScoring {
                    id: spec.id.clone(),
                    reason: e.to_string(),
                })?),
                None => None,
            };
            if spec.prompt_type == PromptType::Performance && scorer.is_some() {
                tracing::warn!(
                    prompt_id = %spec.id,
                    "scoring spec on a performance prompt is ignored"
                );
            }
            prompts.push(PromptDefinition {
                id: spec.id,
                name: spec.name,
                prompt_text: spec.prompt,
                version: spec.version,
                prompt_type: spec.prompt_type,
                replicate_count: spec.replicate_count,
                scorer,
            });
        }
        PromptCatalog::new(self.suite_version, prompts)
    }
}
