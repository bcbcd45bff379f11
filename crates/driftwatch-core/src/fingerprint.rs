use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Deterministic hash over the parts of a catalog that affect measurements.
///
/// Two catalogs with the same `suite_version` but different prompt text produce
/// different fingerprints, which makes silent edits visible in the run log.
pub fn catalog_fingerprint(catalog: &crate::catalog::PromptCatalog) -> String {
    let mut parts = vec![format!("suite_version={}", catalog.suite_version())];
    for p in catalog.prompts() {
        parts.push(format!(
            "{}|{}|{:?}|{}|{}",
            p.id, p.version, p.prompt_type, p.replicate_count, p.prompt_text
        ));
    }
    sha256_hex(&parts.join("\n"))
}
