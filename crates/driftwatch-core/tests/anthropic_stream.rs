use driftwatch_core::config::EndpointConfig;
use driftwatch_core::errors::EndpointErrorKind;
use driftwatch_core::providers::llm::anthropic::AnthropicClient;
use driftwatch_core::providers::llm::{EndpointClient, ExecuteOptions};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> EndpointConfig {
    EndpointConfig {
        provider: "anthropic".into(),
        base_url: server.uri(),
        model: "claude-test".into(),
        api_key_env: "UNUSED".into(),
        region: None,
        request_timeout_secs: 10,
        anthropic_version: "2023-06-01".into(),
    }
}

fn sse(events: &[(&str, &str)]) -> String {
    events
        .iter()
        .map(|(e, d)| format!("event: {}\ndata: {}\n\n", e, d))
        .collect()
}

fn happy_stream() -> String {
    sse(&[
        (
            "message_start",
            r#"{"type":"message_start","message":{"id":"msg_abc","type":"message","role":"assistant","content":[]}}"#,
        ),
        (
            "content_block_start",
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        ),
        ("ping", r#"{"type":"ping"}"#),
        (
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        ),
        (
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" world"}}"#,
        ),
        ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
        (
            "message_delta",
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
        ),
        ("message_stop", r#"{"type":"message_stop"}"#),
    ])
}

#[tokio::test]
async fn streams_a_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({
            "model": "claude-test",
            "stream": true,
            "max_tokens": 64
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(happy_stream(), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let client = AnthropicClient::new(&config(&server), "test-key".into()).unwrap();
    let opts = ExecuteOptions {
        max_tokens: 64,
        ..ExecuteOptions::default()
    };
    let r = client.execute("Say hello", &opts).await;

    assert!(r.error.is_none(), "{:?}", r.error);
    assert_eq!(r.output, "Hello world");
    assert_eq!(r.output_tokens, 2);
    assert_eq!(r.request_id, "msg_abc");
    assert_eq!(r.finish_reason.as_deref(), Some("end_turn"));
    let ttft = r.ttft.expect("ttft recorded");
    assert!(ttft <= r.total_latency);
    assert_eq!(r.output_hash, driftwatch_core::fingerprint::sha256_hex("Hello world"));
}

#[tokio::test]
async fn rate_limit_is_classified_and_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("request-id", "req_429")
                .set_body_string(r#"{"type":"error","error":{"type":"rate_limit_error"}}"#),
        )
        .mount(&server)
        .await;

    let client = AnthropicClient::new(&config(&server), "k".into()).unwrap();
    let r = client.execute("x", &ExecuteOptions::default()).await;

    let err = r.error.expect("error recorded");
    assert_eq!(err.kind, EndpointErrorKind::RateLimited);
    assert_eq!(r.request_id, "req_429");
    assert_eq!(r.output_tokens, 0);
    assert_eq!(r.tokens_per_sec, 0.0);
    assert_eq!(r.ttft, None);
    assert_eq!(r.output_hash, driftwatch_core::fingerprint::sha256_hex(""));
}

#[tokio::test]
async fn bad_request_is_a_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
        .mount(&server)
        .await;

    let client = AnthropicClient::new(&config(&server), "k".into()).unwrap();
    let r = client.execute("x", &ExecuteOptions::default()).await;
    let err = r.error.expect("error recorded");
    assert_eq!(err.kind, EndpointErrorKind::Client);
    assert!(err.message.contains("bad model"));
    assert!(r.request_id.starts_with("local-"));
}

#[tokio::test]
async fn mid_stream_error_event_fails_the_call() {
    let server = MockServer::start().await;
    let body = sse(&[
        (
            "message_start",
            r#"{"type":"message_start","message":{"id":"msg_mid"}}"#,
        ),
        (
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"partial"}}"#,
        ),
        (
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ),
    ]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = AnthropicClient::new(&config(&server), "k".into()).unwrap();
    let r = client.execute("x", &ExecuteOptions::default()).await;
    assert_eq!(r.error.map(|e| e.kind), Some(EndpointErrorKind::Overloaded));
    assert_eq!(r.request_id, "msg_mid");
    assert_eq!(r.output, "");
}

#[tokio::test]
async fn truncated_stream_is_an_error() {
    let server = MockServer::start().await;
    let body = sse(&[(
        "content_block_delta",
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"cut"}}"#,
    )]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = AnthropicClient::new(&config(&server), "k".into()).unwrap();
    let r = client.execute("x", &ExecuteOptions::default()).await;
    assert_eq!(r.error.map(|e| e.kind), Some(EndpointErrorKind::Stream));
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(happy_stream(), "text/event-stream")
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.request_timeout_secs = 1;
    let client = AnthropicClient::new(&cfg, "k".into()).unwrap();
    let r = client.execute("x", &ExecuteOptions::default()).await;
    assert_eq!(r.error.map(|e| e.kind), Some(EndpointErrorKind::Timeout));
}

#[tokio::test]
async fn cache_busting_changes_each_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(happy_stream(), "text/event-stream"))
        .mount(&server)
        .await;

    let client = AnthropicClient::new(&config(&server), "k".into()).unwrap();
    let opts = ExecuteOptions {
        cache_busting: true,
        ..ExecuteOptions::default()
    };
    let a = client.execute("same prompt", &opts).await;
    let b = client.execute("same prompt", &opts).await;
    // The nonce never reaches the output hash.
    assert_eq!(a.output_hash, b.output_hash);

    let received = server.received_requests().await.unwrap();
    let contents: Vec<String> = received
        .iter()
        .map(|req| {
            let v: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            v["messages"][0]["content"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(contents.len(), 2);
    assert_ne!(contents[0], contents[1]);
    assert!(contents.iter().all(|c| c.starts_with("same prompt")));
}
