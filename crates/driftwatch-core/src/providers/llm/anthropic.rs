use super::sse::{SseDecoder, SseEvent};
use super::{with_nonce, EndpointClient, ExecuteOptions};
use crate::config::EndpointConfig;
use crate::errors::{EndpointError, EndpointErrorKind};
use crate::model::ExecutionResult;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    anthropic_version: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(cfg: &EndpointConfig, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("driftwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
            anthropic_version: cfg.anthropic_version.clone(),
            timeout: Duration::from_secs(cfg.request_timeout_secs),
        })
    }

    fn request_body(&self, prompt: &str, opts: &ExecuteOptions) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": opts.max_tokens,
            "stream": true,
            "temperature": opts.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        // The API treats an explicit top_p of 1.0 the same as absent.
        if opts.top_p < 1.0 {
            body["top_p"] = json!(opts.top_p);
        }
        body
    }

    async fn stream(
        &self,
        prompt: &str,
        opts: &ExecuteOptions,
        started: Instant,
    ) -> Result<ExecutionResult, StreamFailure> {
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.anthropic_version)
            .header("accept", "text/event-stream")
            .json(&self.request_body(prompt, opts))
            .send()
            .await
            .map_err(|e| StreamFailure::new(EndpointError::from_transport(&e), None))?;

        let header_id = resp
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StreamFailure::new(
                EndpointError::from_status(status.as_u16(), &body),
                header_id,
            ));
        }

        let mut state = StreamState::default();
        let mut decoder = SseDecoder::new();
        let mut bytes = resp.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| {
                StreamFailure::new(
                    EndpointError::from_transport(&e),
                    state.request_id(&header_id),
                )
            })?;
            for ev in decoder.push(&chunk) {
                state
                    .apply(&ev, started.elapsed().as_secs_f64())
                    .map_err(|e| StreamFailure::new(e, state.request_id(&header_id)))?;
            }
            if state.done {
                break;
            }
        }
        if !state.done {
            if let Some(ev) = decoder.finish() {
                state
                    .apply(&ev, started.elapsed().as_secs_f64())
                    .map_err(|e| StreamFailure::new(e, state.request_id(&header_id)))?;
            }
        }
        if !state.done {
            return Err(StreamFailure::new(
                EndpointError::new(
                    EndpointErrorKind::Stream,
                    "stream ended before message_stop",
                ),
                state.request_id(&header_id),
            ));
        }

        let total_latency = started.elapsed().as_secs_f64();
        let request_id = state
            .request_id(&header_id)
            .unwrap_or_else(crate::model::synthesize_request_id);
        Ok(ExecutionResult::completed(
            state.output,
            state.ttft,
            total_latency,
            state.chunks,
            state.stop_reason,
            request_id,
        ))
    }
}

#[async_trait]
impl EndpointClient for AnthropicClient {
    async fn execute(&self, prompt: &str, opts: &ExecuteOptions) -> ExecutionResult {
        let prompt = if opts.cache_busting {
            with_nonce(prompt)
        } else {
            prompt.to_string()
        };

        let started = Instant::now();
        match tokio::time::timeout(self.timeout, self.stream(&prompt, opts, started)).await {
            Ok(Ok(result)) => result,
            Ok(Err(f)) => {
                tracing::debug!(model = %self.model, error = %f.error, "endpoint call failed");
                ExecutionResult::failed(f.error, f.request_id)
            }
            Err(_) => ExecutionResult::failed(
                EndpointError::new(
                    EndpointErrorKind::Timeout,
                    format!("no completion within {}s", self.timeout.as_secs()),
                ),
                None,
            ),
        }
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

struct StreamFailure {
    error: EndpointError,
    request_id: Option<String>,
}

impl StreamFailure {
    fn new(error: EndpointError, request_id: Option<String>) -> Self {
        Self { error, request_id }
    }
}

/// Accumulates one streamed message.
#[derive(Debug, Default)]
struct StreamState {
    output: String,
    chunks: u32,
    ttft: Option<f64>,
    message_id: Option<String>,
    stop_reason: Option<String>,
    done: bool,
}

impl StreamState {
    fn request_id(&self, header_id: &Option<String>) -> Option<String> {
        self.message_id.clone().or_else(|| header_id.clone())
    }

    /// `elapsed` is seconds since the request was dispatched.
    fn apply(&mut self, ev: &SseEvent, elapsed: f64) -> Result<(), EndpointError> {
        if ev.data.trim().is_empty() {
            return Ok(());
        }
        let data: Value = serde_json::from_str(&ev.data).map_err(|e| {
            EndpointError::new(
                EndpointErrorKind::Stream,
                format!("malformed event payload: {}", e),
            )
        })?;
        let kind = ev
            .event
            .as_deref()
            .or_else(|| data.get("type").and_then(Value::as_str))
            .unwrap_or_default();

        match kind {
            "message_start" => {
                self.message_id = data
                    .pointer("/message/id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            "content_block_delta" => {
                let delta = &data["delta"];
                if delta["type"] == "text_delta" {
                    let text = delta["text"].as_str().unwrap_or_default();
                    if !text.is_empty() {
                        if self.ttft.is_none() {
                            self.ttft = Some(elapsed);
                        }
                        self.output.push_str(text);
                        self.chunks += 1;
                    }
                }
            }
            "message_delta" => {
                if let Some(reason) = data.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(reason.to_string());
                }
            }
            "message_stop" => self.done = true,
            "error" => {
                let err_type = data
                    .pointer("/error/type")
                    .and_then(Value::as_str)
                    .unwrap_or("error");
                let message = data
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error");
                let kind = match err_type {
                    "overloaded_error" => EndpointErrorKind::Overloaded,
                    "rate_limit_error" => EndpointErrorKind::RateLimited,
                    "api_error" => EndpointErrorKind::Server,
                    _ => EndpointErrorKind::Stream,
                };
                return Err(EndpointError::new(
                    kind,
                    format!("{}: {}", err_type, message),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(event: &str, data: &str) -> SseEvent {
        SseEvent {
            event: Some(event.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn accumulates_text_and_metadata() {
        let mut s = StreamState::default();
        s.apply(
            &ev("message_start", r#"{"type":"message_start","message":{"id":"msg_01"}}"#),
            0.05,
        )
        .unwrap();
        s.apply(&ev("ping", r#"{"type":"ping"}"#), 0.06).unwrap();
        s.apply(
            &ev(
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":""}}"#,
            ),
            0.08,
        )
        .unwrap();
        s.apply(
            &ev(
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"39"}}"#,
            ),
            0.10,
        )
        .unwrap();
        s.apply(
            &ev(
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"1"}}"#,
            ),
            0.12,
        )
        .unwrap();
        s.apply(
            &ev(
                "message_delta",
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#,
            ),
            0.13,
        )
        .unwrap();
        s.apply(&ev("message_stop", r#"{"type":"message_stop"}"#), 0.14)
            .unwrap();

        assert_eq!(s.output, "391");
        assert_eq!(s.chunks, 2);
        assert_eq!(s.ttft, Some(0.10));
        assert_eq!(s.message_id.as_deref(), Some("msg_01"));
        assert_eq!(s.stop_reason.as_deref(), Some("end_turn"));
        assert!(s.done);
    }

    #[test]
    fn error_event_is_classified() {
        let mut s = StreamState::default();
        let err = s
            .apply(
                &ev(
                    "error",
                    r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
                ),
                0.2,
            )
            .unwrap_err();
        assert_eq!(err.kind, EndpointErrorKind::Overloaded);
        assert!(err.message.contains("Overloaded"));
    }

    #[test]
    fn request_id_prefers_message_id() {
        let mut s = StreamState::default();
        let header = Some("req_hdr".to_string());
        assert_eq!(s.request_id(&header).as_deref(), Some("req_hdr"));
        s.message_id = Some("msg_x".into());
        assert_eq!(s.request_id(&header).as_deref(), Some("msg_x"));
    }

    #[test]
    fn top_p_only_sent_when_narrowed() {
        let cfg = EndpointConfig {
            provider: "anthropic".into(),
            base_url: "http://localhost/".into(),
            model: "m".into(),
            api_key_env: "X".into(),
            region: None,
            request_timeout_secs: 5,
            anthropic_version: "2023-06-01".into(),
        };
        let client = AnthropicClient::new(&cfg, "k".into()).unwrap();
        let mut opts = ExecuteOptions::default();
        assert!(client.request_body("hi", &opts).get("top_p").is_none());
        opts.top_p = 0.9;
        assert_eq!(client.request_body("hi", &opts)["top_p"], json!(0.9));
        assert_eq!(client.base_url, "http://localhost");
    }
}
