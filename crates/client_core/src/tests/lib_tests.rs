use super::*;
use crate::viewer::{COMPLETE_LINE, STARTING_LINE};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream;
use server::{api::ApiContext, build_router, rollout::RolloutSimulator};
use shared::{domain::Weights, error::ErrorCode, protocol::LAST_EVENT_ID_HEADER};
use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::net::TcpListener;

#[derive(Clone)]
struct ServerState {
    frames: Arc<Vec<String>>,
    stream_hits: Arc<AtomicUsize>,
    last_event_ids: Arc<Mutex<Vec<Option<String>>>>,
}

impl ServerState {
    fn last_event_ids(&self) -> Vec<Option<String>> {
        self.last_event_ids.lock().expect("lock").clone()
    }
}

fn frame(step: u32) -> String {
    let weights = Weights::for_step(step);
    serde_json::json!({ "step": step, "weights": weights }).to_string()
}

async fn handle_stream(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    state.stream_hits.fetch_add(1, Ordering::SeqCst);
    let last_event_id = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.last_event_ids.lock().expect("lock").push(last_event_id);

    let frames: Vec<String> = state.frames.as_ref().clone();
    Sse::new(stream::iter(frames.into_iter().enumerate().map(|(index, data)| {
        Ok::<_, Infallible>(
            Event::default()
                .id((index + 1).to_string())
                .retry(Duration::from_millis(1))
                .data(data),
        )
    })))
}

async fn handle_rollout() -> Json<RolloutStarted> {
    Json(RolloutStarted {
        message: "Rollout started".into(),
        mode: "simulation".into(),
    })
}

async fn handle_state() -> Json<RolloutSnapshot> {
    Json(RolloutSnapshot {
        app: "SkyCanary".into(),
        version: "stable".into(),
        use_k8s: false,
        weights: Weights::for_step(25),
    })
}

async fn handle_message(
    Json(req): Json<OperatorMessage>,
) -> Result<Json<MessageAck>, (StatusCode, Json<ApiError>)> {
    if req.text() == "reject" {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, "message rejected")),
        ));
    }
    Ok(Json(MessageAck::ok(req.text())))
}

async fn spawn_rollout_server(frames: Vec<String>) -> Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState {
        frames: Arc::new(frames),
        stream_hits: Arc::new(AtomicUsize::new(0)),
        last_event_ids: Arc::new(Mutex::new(Vec::new())),
    };
    let stub = state.clone();
    let app = Router::new()
        .route(STREAM_ROUTE, get(handle_stream))
        .route(ROLLOUT_ROUTE, post(handle_rollout))
        .route(STATE_ROUTE, get(handle_state))
        .route(MESSAGE_ROUTE, post(handle_message))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), stub))
}

fn viewer_for(client: &RolloutClient, config: ViewerConfig) -> RolloutViewer<MemorySurface> {
    let source = client.progress_source().expect("progress source");
    RolloutViewer::new(Arc::new(source), MemorySurface::new(), config)
}

#[tokio::test]
async fn viewer_completes_against_sse_endpoint() {
    let frames = [10, 25, 50, 75, 100].into_iter().map(frame).collect();
    let (server_url, stub) = spawn_rollout_server(frames).await.expect("spawn server");
    let client = RolloutClient::new(&server_url).expect("client");
    let mut viewer = viewer_for(&client, ViewerConfig::default());

    let outcome = viewer.on_start_clicked().await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(outcome.events(), 5);
    let surface = viewer.surface();
    assert_eq!(surface.progress_width(), "100%");
    assert_eq!(surface.weights_label(), "Stable: 0% | Canary: 100%");
    assert_eq!(surface.log().first().map(String::as_str), Some(STARTING_LINE));
    assert_eq!(surface.log().last().map(String::as_str), Some(COMPLETE_LINE));
    assert_eq!(surface.log().len(), 7);
    assert_eq!(stub.stream_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_payload_over_http_halts_subscription() {
    let frames = vec![frame(10), r#"{"step":null}"#.to_string(), frame(100)];
    let (server_url, stub) = spawn_rollout_server(frames).await.expect("spawn server");
    let client = RolloutClient::new(&server_url).expect("client");
    let mut viewer = viewer_for(&client, ViewerConfig::default());

    let outcome = viewer.on_start_clicked().await;

    match outcome {
        ViewerOutcome::Failed { events, error } => {
            assert_eq!(events, 1);
            assert!(matches!(error, StreamError::Decode { .. }));
        }
        other => panic!("expected decode failure, got {other:?}"),
    }
    assert_eq!(viewer.surface().progress(), 10);
    assert_eq!(stub.stream_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stream_ending_early_is_retried_then_reported() {
    let frames = vec![frame(10), frame(25)];
    let (server_url, stub) = spawn_rollout_server(frames).await.expect("spawn server");
    let client = RolloutClient::new(&server_url).expect("client");
    let config = ViewerConfig {
        reconnect: ReconnectPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1,
        },
        idle_timeout: None,
    };
    let mut viewer = viewer_for(&client, config);

    let outcome = viewer.on_start_clicked().await;

    assert!(matches!(
        outcome,
        ViewerOutcome::Failed {
            error: StreamError::Closed,
            ..
        }
    ));
    assert_eq!(stub.stream_hits.load(Ordering::SeqCst), 2);
    assert_eq!(stub.last_event_ids(), vec![None, Some("2".to_string())]);
    assert!(viewer.surface().error().is_some());
}

/// Accepts connections and holds them open without ever answering.
async fn spawn_silent_server() -> Result<(String, Arc<AtomicUsize>)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });
    Ok((format!("http://{addr}"), accepted))
}

#[tokio::test]
async fn idle_timeout_covers_an_unanswered_request() {
    let (server_url, accepted) = spawn_silent_server().await.expect("spawn server");
    let client = RolloutClient::new(&server_url).expect("client");
    let config = ViewerConfig {
        reconnect: ReconnectPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1,
        },
        idle_timeout: Some(Duration::from_millis(200)),
    };
    let mut viewer = viewer_for(&client, config);

    let outcome = tokio::time::timeout(Duration::from_secs(5), viewer.on_start_clicked())
        .await
        .expect("viewer gave up within the idle timeout");

    assert!(matches!(
        outcome,
        ViewerOutcome::Failed {
            error: StreamError::IdleTimeout(_),
            events: 0,
        }
    ));
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert_eq!(viewer.state(), ViewerState::Failed);
    assert!(viewer
        .surface()
        .error()
        .expect("error shown")
        .contains("no progress event received"));
}

#[tokio::test]
async fn viewer_completes_against_rollout_router() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let api = ApiContext {
        app_name: "SkyCanary".to_string(),
        app_version: "stable".to_string(),
        use_k8s: false,
        rollout: RolloutSimulator::new(vec![10, 25, 50, 75, 100], Duration::from_millis(1)),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, build_router(api)).await;
    });
    let client = RolloutClient::new(&format!("http://{addr}")).expect("client");
    let mut viewer = viewer_for(&client, ViewerConfig::default());

    let outcome = viewer.on_start_clicked().await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(outcome.events(), 5);
    let step_lines: Vec<&String> = viewer
        .surface()
        .log()
        .iter()
        .filter(|line| line.starts_with("→ Canary rollout:"))
        .collect();
    assert_eq!(step_lines.len(), 5);
    assert_eq!(viewer.surface().log().last().map(String::as_str), Some(COMPLETE_LINE));

    let snapshot = client.fetch_state().await.expect("state");
    assert_eq!(snapshot.weights.label(), "Stable: 0% | Canary: 100%");
}

#[tokio::test]
async fn missing_stream_route_reports_status() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route("/healthz", get(|| async { "ok" }));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let client = RolloutClient::new(&format!("http://{addr}")).expect("client");
    let source = client.progress_source().expect("source");
    let err = match source.subscribe().await {
        Ok(_) => panic!("subscription should fail"),
        Err(err) => err,
    };
    assert!(matches!(err, StreamError::Status { status: 404, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn refused_connection_is_retryable() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = RolloutClient::new(&format!("http://{addr}")).expect("client");
    let source = client.progress_source().expect("source");
    let err = match source.subscribe().await {
        Ok(_) => panic!("nothing is listening"),
        Err(err) => err,
    };
    assert!(matches!(err, StreamError::Connect { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn rest_endpoints_round_trip() {
    let (server_url, _stub) = spawn_rollout_server(Vec::new()).await.expect("spawn server");
    let client = RolloutClient::new(&server_url).expect("client");

    let started = client.start_rollout().await.expect("start");
    assert_eq!(started.mode, "simulation");

    let snapshot = client.fetch_state().await.expect("state");
    assert_eq!(snapshot.app, "SkyCanary");
    assert_eq!(snapshot.weights, Weights::for_step(25));

    let ack = client.send_message("hold at 25%").await.expect("message");
    assert_eq!(ack, MessageAck::ok("hold at 25%"));
}

#[tokio::test]
async fn rejected_message_surfaces_api_error() {
    let (server_url, _stub) = spawn_rollout_server(Vec::new()).await.expect("spawn server");
    let client = RolloutClient::new(&server_url).expect("client");

    let err = client.send_message("reject").await.expect_err("should fail");
    let api = err
        .downcast_ref::<ApiException>()
        .expect("api exception in chain");
    assert_eq!(api.code, ErrorCode::Validation);
    assert_eq!(api.message, "message rejected");
}

#[test]
fn client_rejects_non_http_urls() {
    assert!(RolloutClient::new("ftp://127.0.0.1").is_err());
    assert!(RolloutClient::new("not a url").is_err());

    let client = RolloutClient::new("http://127.0.0.1:8090").expect("client");
    let source = client.progress_source().expect("source");
    assert_eq!(source.url().as_str(), "http://127.0.0.1:8090/api/stream");
}
