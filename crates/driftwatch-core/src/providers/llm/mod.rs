use crate::model::ExecutionResult;
use async_trait::async_trait;
use std::time::Duration;

pub mod anthropic;
pub mod fake;
pub mod sse;

/// Longest single backoff sleep between retries.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOptions {
    pub max_tokens: u32,
    pub cache_busting: bool,
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            cache_busting: false,
            temperature: 0.0,
            top_p: 1.0,
        }
    }
}

/// A streaming completion endpoint under measurement.
///
/// `execute` never fails: transport and API errors come back inside the
/// result so a single bad call cannot abort a suite.
#[async_trait]
pub trait EndpointClient: Send + Sync {
    async fn execute(&self, prompt: &str, opts: &ExecuteOptions) -> ExecutionResult;

    fn provider_name(&self) -> &'static str;

    /// Retries retryable failures with `2^attempt` second backoff, up to
    /// `max_retries` extra attempts.
    async fn execute_with_retry(
        &self,
        prompt: &str,
        opts: &ExecuteOptions,
        max_retries: u32,
    ) -> ExecutionResult {
        let mut attempt: u32 = 0;
        loop {
            let result = self.execute(prompt, opts).await;
            let retryable = result
                .error
                .as_ref()
                .map(|e| e.kind.is_retryable())
                .unwrap_or(false);
            if !retryable || attempt >= max_retries {
                return result;
            }

            let delay = backoff_delay(attempt);
            tracing::warn!(
                provider = self.provider_name(),
                attempt = attempt + 1,
                max_retries,
                delay_secs = delay.as_secs(),
                error = ?result.error,
                "retrying endpoint call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// Appends a unique marker that does not change what is being asked.
pub fn with_nonce(prompt: &str) -> String {
    format!("{}\n\n[request-nonce: {}]", prompt, uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), MAX_BACKOFF);
        assert_eq!(backoff_delay(200), MAX_BACKOFF);
    }

    #[test]
    fn nonce_keeps_prompt_prefix_and_differs() {
        let a = with_nonce("What is 2+2?");
        let b = with_nonce("What is 2+2?");
        assert!(a.starts_with("What is 2+2?"));
        assert_ne!(a, b);
    }
}
