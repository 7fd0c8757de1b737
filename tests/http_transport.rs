use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream;
use parking_lot::Mutex;
use serde_json::json;

use localgen_decoder::config::{ApiMode, AppConfig, LivenessConfig};
use localgen_decoder::error::DecodeError;
use localgen_decoder::stream::{FinishReason, Outcome};
use localgen_decoder::transport::{GenerationRequest, HttpTransport};

async fn spawn_server(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

fn config_for(base_url: String, api: ApiMode) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.base_url = base_url;
    config.server.api = api;
    config.server.model = "llama3".to_string();
    config
}

fn chunked(pieces: &'static [&'static str]) -> Body {
    Body::from_stream(stream::iter(
        pieces
            .iter()
            .map(|piece| Ok::<_, Infallible>(Bytes::from_static(piece.as_bytes()))),
    ))
}

#[tokio::test]
async fn test_generate_stream_over_http() {
    let seen: Arc<Mutex<Option<serde_json::Value>>> = Arc::default();
    let captured = seen.clone();
    let app = Router::new().route(
        "/api/generate",
        post(move |Json(body): Json<serde_json::Value>| {
            let captured = captured.clone();
            async move {
                *captured.lock() = Some(body);
                Response::builder()
                    .header("content-type", "application/x-ndjson")
                    .body(chunked(&[
                        "{\"model\":\"llama3\",\"response\":\"Hel",
                        "lo\",\"done\":false}\n{\"model\":\"llama3\",\"response\":\" wor",
                        "ld\",\"done\":false}\n",
                        "{\"model\":\"llama3\",\"response\":\"\",\"done\":true,\"eval_count\":2}\n",
                    ]))
                    .expect("build response")
            }
        }),
    );
    let (base_url, server) = spawn_server(app).await;

    let transport = HttpTransport::new(&config_for(base_url, ApiMode::Generate)).expect("transport");
    let (decoder, fragments) = transport.decoder();
    transport
        .run(&GenerationRequest::new("Say hello"), &decoder)
        .await;
    let (fragments, outcome) = fragments.collect().await;

    assert_eq!(fragments, vec!["Hello", " world"]);
    assert_eq!(
        outcome,
        Outcome::Finished {
            reason: FinishReason::Normal,
            text: "Hello world".to_string()
        }
    );
    let body = seen.lock().take().expect("request body");
    assert_eq!(body["model"], "llama3");
    assert_eq!(body["prompt"], "Say hello");
    assert_eq!(body["stream"], true);

    server.abort();
}

#[tokio::test]
async fn test_chat_stream_with_concatenated_objects() {
    let app = Router::new().route(
        "/api/chat",
        post(|Json(body): Json<serde_json::Value>| async move {
            assert_eq!(body["messages"][0]["role"], "user");
            Response::builder()
                .body(chunked(&[
                    r#"{"message":{"role":"assistant","content":"Part1"}}{"message":{"role":"assis"#,
                    r#"tant","content":"Part2"},"done":true}"#,
                ]))
                .expect("build response")
        }),
    );
    let (base_url, server) = spawn_server(app).await;

    let transport = HttpTransport::new(&config_for(base_url, ApiMode::Chat)).expect("transport");
    let (_decoder, fragments) = transport.start(GenerationRequest::new("ping"));
    let (fragments, outcome) = fragments.collect().await;

    assert_eq!(fragments, vec!["Part1", "Part2"]);
    assert!(matches!(outcome, Outcome::Finished { reason: FinishReason::Normal, .. }));

    server.abort();
}

#[tokio::test]
async fn test_error_status_surfaces_server_message() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "model not loaded"})),
            )
                .into_response()
        }),
    );
    let (base_url, server) = spawn_server(app).await;

    let transport = HttpTransport::new(&config_for(base_url, ApiMode::Generate)).expect("transport");
    let (decoder, fragments) = transport.decoder();
    transport.run(&GenerationRequest::new("hi"), &decoder).await;
    let (fragments, outcome) = fragments.collect().await;

    assert!(fragments.is_empty());
    assert_eq!(
        outcome,
        Outcome::Failed(DecodeError::Server {
            status: 500,
            message: "model not loaded".to_string()
        })
    );

    server.abort();
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let transport = HttpTransport::new(&config_for(format!("http://{addr}"), ApiMode::Generate))
        .expect("transport");
    let (decoder, fragments) = transport.decoder();
    transport.run(&GenerationRequest::new("hi"), &decoder).await;
    let (fragments, outcome) = fragments.collect().await;

    assert!(fragments.is_empty());
    assert!(
        matches!(outcome, Outcome::Failed(DecodeError::Transport(_))),
        "unexpected outcome {outcome:?}"
    );
}

#[tokio::test]
async fn test_stalled_body_is_completed_by_liveness_monitor() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async {
            let first = stream::iter([Ok::<_, Infallible>(Bytes::from_static(
                b"{\"response\":\"partial answer before the stall\"}\n",
            ))]);
            let body = Body::from_stream(futures_util::StreamExt::chain(first, stream::pending()));
            Response::builder().body(body).expect("build response")
        }),
    );
    let (base_url, server) = spawn_server(app).await;

    let mut config = config_for(base_url, ApiMode::Generate);
    config.liveness = LivenessConfig {
        tick_interval_ms: 10,
        stall_warn_after_ms: 50,
        min_recovery_chars: 10,
    };
    let transport = HttpTransport::new(&config).expect("transport");
    let (decoder, fragments) = transport.decoder();
    transport.run(&GenerationRequest::new("hi"), &decoder).await;
    let (fragments, outcome) = fragments.collect().await;

    assert_eq!(fragments[0], "partial answer before the stall");
    assert_eq!(fragments.len(), 2);
    assert_eq!(
        outcome,
        Outcome::Finished {
            reason: FinishReason::StallRecovered,
            text: "partial answer before the stall".to_string()
        }
    );

    server.abort();
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_body() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async {
            let first = stream::iter([Ok::<_, Infallible>(Bytes::from_static(
                b"{\"response\":\"streaming\"}\n",
            ))]);
            let body = Body::from_stream(futures_util::StreamExt::chain(first, stream::pending()));
            Response::builder().body(body).expect("build response")
        }),
    );
    let (base_url, server) = spawn_server(app).await;

    let transport = HttpTransport::new(&config_for(base_url, ApiMode::Generate)).expect("transport");
    let (decoder, mut fragments) = transport.start(GenerationRequest::new("hi"));
    let first = fragments.next_event().await;
    assert_eq!(
        first,
        Some(localgen_decoder::stream::DecodeEvent::Fragment(
            "streaming".to_string()
        ))
    );

    decoder.cancel();
    let (rest, outcome) = fragments.collect().await;
    assert!(rest.is_empty());
    assert_eq!(outcome, Outcome::Cancelled);
    assert!(decoder.cancellation_token().is_cancelled());

    server.abort();
}
