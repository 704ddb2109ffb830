use super::*;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response as AxumResponse},
    routing::{delete, get, post},
    Json, Router,
};
use shared::{domain::ScanMode, error::ErrorCode, protocol::FileEntry};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use uuid::Uuid;

#[derive(Clone, Default)]
struct EngineState {
    started: Arc<Mutex<Option<(SessionId, StartScanRequest)>>>,
    page_queries: Arc<Mutex<Vec<(String, String, u64, u64)>>>,
    delete_bodies: Arc<Mutex<Vec<DeleteSelectedRequest>>>,
    commands: Arc<Mutex<Vec<String>>>,
}

async fn handle_start(
    State(state): State<EngineState>,
    Json(request): Json<StartScanRequest>,
) -> Json<StartScanResponse> {
    let session_id = SessionId::new(Uuid::new_v4().to_string());
    *state.started.lock().await = Some((session_id.clone(), request));
    Json(StartScanResponse { session_id })
}

async fn handle_pause(
    State(state): State<EngineState>,
    Path(id): Path<String>,
) -> AxumResponse {
    if id == "missing" {
        let body = ApiError::new(ErrorCode::NotFound, "scan missing not found");
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    }
    state.commands.lock().await.push(format!("pause {id}"));
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_resume(Path(_id): Path<String>) -> AxumResponse {
    (StatusCode::CONFLICT, "engine busy").into_response()
}

async fn handle_progress(Path(_id): Path<String>) -> Json<Option<ScanProgress>> {
    Json(None)
}

async fn handle_category_files(
    State(state): State<EngineState>,
    Path((id, key)): Path<(String, String)>,
    Query(query): Query<CategoryFilesQuery>,
) -> Json<CategoryPage> {
    state
        .page_queries
        .lock()
        .await
        .push((id, key.clone(), query.offset, query.limit));
    let files = (query.offset..query.offset + 2)
        .map(|n| FileEntry {
            path: format!("/{key}/{n}"),
            name: n.to_string(),
            size: 7,
            modified_time: 0,
            category: key.clone(),
        })
        .collect();
    Json(CategoryPage {
        files,
        total: 10,
        has_more: true,
    })
}

async fn handle_delete_selected(
    State(state): State<EngineState>,
    Path(id): Path<String>,
    Json(body): Json<DeleteSelectedRequest>,
) -> Json<CleanResult> {
    let cleaned = body.paths.len() as u64;
    state.delete_bodies.lock().await.push(body);
    Json(CleanResult {
        session_id: Some(SessionId::new(id)),
        total_files: cleaned,
        cleaned_files: cleaned,
        ..CleanResult::default()
    })
}

async fn handle_clear(State(state): State<EngineState>, Path(id): Path<String>) -> StatusCode {
    state.commands.lock().await.push(format!("clear {id}"));
    StatusCode::NO_CONTENT
}

async fn handle_events(ws: WebSocketUpgrade) -> AxumResponse {
    ws.on_upgrade(|mut socket| async move {
        let event = EngineEvent::Progress(ScanProgress {
            session_id: Some(SessionId::new("scan-ws")),
            current_path: "/home/user".to_string(),
            scanned_files: 42,
            ..ScanProgress::default()
        });
        if let Ok(text) = serde_json::to_string(&event) {
            let _ = socket.send(WsMessage::Text(text)).await;
        }
        let _ = socket.send(WsMessage::Close(None)).await;
    })
}

async fn spawn_engine_server() -> Result<(String, EngineState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = EngineState::default();
    let app = Router::new()
        .route("/scans", post(handle_start))
        .route("/scans/:id/pause", post(handle_pause))
        .route("/scans/:id/resume", post(handle_resume))
        .route("/scans/:id/progress", get(handle_progress))
        .route("/scans/:id/categories/:key/files", get(handle_category_files))
        .route("/scans/:id/delete-selected", post(handle_delete_selected))
        .route("/scans/:id", delete(handle_clear))
        .route("/events", get(handle_events))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

#[test]
fn endpoints_extend_base_path() {
    let engine = HttpScanEngine::new("http://127.0.0.1:9/api/").expect("engine");

    assert_eq!(
        engine.endpoint(&["scans", "s1", "pause"]).as_str(),
        "http://127.0.0.1:9/api/scans/s1/pause"
    );
    assert_eq!(
        engine.events_url().expect("ws url").as_str(),
        "ws://127.0.0.1:9/api/events"
    );
}

#[test]
fn rejects_non_http_engine_url() {
    assert!(HttpScanEngine::new("ftp://127.0.0.1/").is_err());
    assert!(HttpScanEngine::new("not a url").is_err());
}

#[tokio::test]
async fn start_posts_request_and_returns_session_id() {
    let (url, state) = spawn_engine_server().await.expect("spawn server");
    let engine = HttpScanEngine::new(&url).expect("engine");

    let session_id = engine
        .start(StartScanRequest {
            paths: vec!["/home".to_string()],
            mode: ScanMode::Full,
            include_hidden: true,
            ..StartScanRequest::default()
        })
        .await
        .expect("start");

    let started = state.started.lock().await.clone().expect("start recorded");
    assert_eq!(started.0, session_id);
    assert_eq!(started.1.paths, vec!["/home".to_string()]);
    assert_eq!(started.1.mode, ScanMode::Full);
    assert!(started.1.include_hidden);
}

#[tokio::test]
async fn category_files_sends_offset_and_limit() {
    let (url, state) = spawn_engine_server().await.expect("spawn server");
    let engine = HttpScanEngine::new(&url).expect("engine");

    let page = engine
        .category_files(&SessionId::new("s1"), "logs", 4, 2)
        .await
        .expect("page")
        .expect("some page");

    assert_eq!(page.files.len(), 2);
    assert_eq!(page.files[0].path, "/logs/4");
    assert_eq!(page.total, 10);
    assert_eq!(
        *state.page_queries.lock().await,
        vec![("s1".to_string(), "logs".to_string(), 4, 2)]
    );
}

#[tokio::test]
async fn delete_selected_posts_paths() {
    let (url, state) = spawn_engine_server().await.expect("spawn server");
    let engine = HttpScanEngine::new(&url).expect("engine");
    let paths = vec!["/tmp/a".to_string(), "/tmp/b".to_string()];

    let clean = engine
        .delete_selected(&SessionId::new("s1"), &paths, true)
        .await
        .expect("delete");

    assert_eq!(clean.cleaned_files, 2);
    let bodies = state.delete_bodies.lock().await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0].paths, paths);
    assert!(bodies[0].move_to_trash);
}

#[tokio::test]
async fn commands_hit_session_routes() {
    let (url, state) = spawn_engine_server().await.expect("spawn server");
    let engine = HttpScanEngine::new(&url).expect("engine");

    engine.pause(&SessionId::new("s1")).await.expect("pause");
    engine.clear_result(&SessionId::new("s1")).await.expect("clear");

    assert_eq!(
        *state.commands.lock().await,
        vec!["pause s1".to_string(), "clear s1".to_string()]
    );
}

#[tokio::test]
async fn null_progress_is_none() {
    let (url, _state) = spawn_engine_server().await.expect("spawn server");
    let engine = HttpScanEngine::new(&url).expect("engine");

    let progress = engine.progress(&SessionId::new("s1")).await.expect("progress");

    assert!(progress.is_none());
}

#[tokio::test]
async fn api_error_body_is_surfaced() {
    let (url, _state) = spawn_engine_server().await.expect("spawn server");
    let engine = HttpScanEngine::new(&url).expect("engine");

    let err = engine
        .pause(&SessionId::new("missing"))
        .await
        .expect_err("unknown scan");
    let api = err.downcast_ref::<ApiException>().expect("api exception");
    assert_eq!(api.code, ErrorCode::NotFound);
    assert!(api.message.contains("not found"));

    let err = engine
        .resume(&SessionId::new("s1"))
        .await
        .expect_err("busy engine");
    let err_text = format!("{err:#}");
    assert!(err_text.contains("409"), "unexpected error: {err_text}");
    assert!(err_text.contains("engine busy"), "unexpected error: {err_text}");
}

#[tokio::test]
async fn event_stream_forwards_frames() {
    let (url, _state) = spawn_engine_server().await.expect("spawn server");
    let engine = HttpScanEngine::new(&url).expect("engine");
    let mut events = engine.subscribe_events();

    engine.connect_events().await.expect("connect events");

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event in time")
        .expect("event");
    match event {
        EngineEvent::Progress(progress) => {
            assert_eq!(progress.session_id, Some(SessionId::new("scan-ws")));
            assert_eq!(progress.scanned_files, 42);
        }
        other => panic!("unexpected event {other:?}"),
    }
}
