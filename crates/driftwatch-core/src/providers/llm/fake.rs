use super::{with_nonce, EndpointClient, ExecuteOptions};
use crate::errors::EndpointError;
use crate::model::{synthesize_request_id, ExecutionResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// What the fake endpoint answers for one call.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Text {
        output: String,
        ttft: f64,
        latency: f64,
        tokens: u32,
    },
    Error(EndpointError),
}

impl FakeReply {
    pub fn text(output: &str) -> Self {
        FakeReply::Text {
            output: output.to_string(),
            ttft: 0.1,
            latency: 1.0,
            tokens: output.split_whitespace().count().max(1) as u32,
        }
    }
}

type Script = dyn Fn(&str, usize) -> FakeReply + Send + Sync;

/// Scripted endpoint for tests and dry runs. No network, no sleeping.
pub struct FakeClient {
    script: Box<Script>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeClient {
    /// `script` receives the prompt as sent and the zero-based call index.
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, usize) -> FakeReply + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| FakeReply::text(&text))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts in call order, including any nonce that was appended.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EndpointClient for FakeClient {
    async fn execute(&self, prompt: &str, opts: &ExecuteOptions) -> ExecutionResult {
        let sent = if opts.cache_busting {
            with_nonce(prompt)
        } else {
            prompt.to_string()
        };
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut p) = self.prompts.lock() {
            p.push(sent.clone());
        }

        match (self.script)(&sent, idx) {
            FakeReply::Text {
                output,
                ttft,
                latency,
                tokens,
            } => {
                let ttft = if output.is_empty() { None } else { Some(ttft) };
                ExecutionResult::completed(
                    output,
                    ttft,
                    latency,
                    tokens,
                    Some("end_turn".to_string()),
                    format!("fake-{}", idx),
                )
            }
            FakeReply::Error(e) => ExecutionResult::failed(e, Some(synthesize_request_id())),
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EndpointErrorKind;

    #[tokio::test]
    async fn records_prompts_and_counts_calls() {
        let c = FakeClient::constant("hello world");
        let r = c.execute("q", &ExecuteOptions::default()).await;
        assert_eq!(r.output, "hello world");
        assert_eq!(r.output_tokens, 2);
        assert_eq!(r.tokens_per_sec, 2.0);
        assert_eq!(c.call_count(), 1);
        assert_eq!(c.prompts(), vec!["q".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_after_cap() {
        let c = FakeClient::new(|_, _| {
            FakeReply::Error(EndpointError::new(EndpointErrorKind::Overloaded, "busy"))
        });
        let r = c
            .execute_with_retry("q", &ExecuteOptions::default(), 3)
            .await;
        assert!(r.is_error());
        assert_eq!(c.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_and_skips_client_errors() {
        let c = FakeClient::new(|_, i| {
            if i < 2 {
                FakeReply::Error(EndpointError::new(EndpointErrorKind::RateLimited, "slow"))
            } else {
                FakeReply::text("ok")
            }
        });
        let started = tokio::time::Instant::now();
        let r = c
            .execute_with_retry("q", &ExecuteOptions::default(), 5)
            .await;
        assert!(!r.is_error());
        assert_eq!(c.call_count(), 3);
        // 1s + 2s of backoff on the paused clock
        assert_eq!(started.elapsed().as_secs(), 3);

        let bad = FakeClient::new(|_, _| {
            FakeReply::Error(EndpointError::new(EndpointErrorKind::Client, "bad request"))
        });
        bad.execute_with_retry("q", &ExecuteOptions::default(), 5)
            .await;
        assert_eq!(bad.call_count(), 1);
    }
}
