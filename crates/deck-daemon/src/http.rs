use crate::core::CoreEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use deck_proto::protocol::{Command, PlayerState};
use deck_proto::state::StateManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<CoreEvent>) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/now-playing", get(now_playing))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/toggle", post(toggle))
        .route("/api/next", post(next))
        .route("/api/prev", post(prev))
        .route("/api/stop", post(stop))
        .route("/api/seek/:seconds", post(seek_to))
        .route("/api/seek-by/:offset", post(seek_by))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerState> {
    Json(state.state_manager.get_state().await)
}

/// 204 when nothing is loaded.
async fn now_playing(State(state): State<HttpState>) -> Response {
    match state.state_manager.get_state().await.now_playing() {
        Some(np) => Json(np).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state
        .event_tx
        .send(CoreEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("HTTP API: core event channel closed");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Play).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Pause).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::TogglePause).await
}

async fn next(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Next).await
}

async fn prev(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Prev).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Stop).await
}

async fn seek_to(State(state): State<HttpState>, Path(seconds): Path<f64>) -> StatusCode {
    if !seconds.is_finite() || seconds < 0.0 {
        return StatusCode::BAD_REQUEST;
    }
    dispatch(&state, Command::SeekTo { seconds }).await
}

async fn seek_by(State(state): State<HttpState>, Path(offset): Path<f64>) -> StatusCode {
    if !offset.is_finite() {
        return StatusCode::BAD_REQUEST;
    }
    dispatch(&state, Command::SeekBy { seconds: offset }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::track;
    use axum::body::Body;
    use axum::http::Request;
    use deck_proto::protocol::{BackendKind, NowPlaying};
    use tower::ServiceExt;

    fn setup() -> (Router, Arc<StateManager>, mpsc::Receiver<CoreEvent>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sm = Arc::new(StateManager::new(dir.path().join("state.json"), 10));
        let (tx, rx) = mpsc::channel(8);
        (router(sm.clone(), tx), sm, rx, dir)
    }

    fn post_to(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn get_from(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_now_playing_is_no_content_when_idle() {
        let (app, _sm, _rx, _dir) = setup();
        let resp = app.oneshot(get_from("/api/now-playing")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_now_playing_reports_current_track() {
        let (app, sm, _rx, _dir) = setup();
        sm.set_loading(track("a", None), BackendKind::DirectStream)
            .await;
        sm.set_timeline(Some(42.0), Some(200.0)).await;

        let resp = app.oneshot(get_from("/api/now-playing")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let np: NowPlaying = serde_json::from_slice(&body).unwrap();
        assert_eq!(np.title, "Title a");
        assert_eq!(np.position_seconds, 42.0);
        assert_eq!(np.duration_seconds, Some(200.0));
        assert!(!np.is_playing);
    }

    #[tokio::test]
    async fn test_state_route_returns_snapshot() {
        let (app, _sm, _rx, _dir) = setup();
        let resp = app.oneshot(get_from("/api/state")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let state: PlayerState = serde_json::from_slice(&body).unwrap();
        assert!(state.current_track.is_none());
    }

    #[tokio::test]
    async fn test_transport_routes_post_commands() {
        let (app, _sm, mut rx, _dir) = setup();

        let resp = app.clone().oneshot(post_to("/api/toggle")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(matches!(
            rx.recv().await,
            Some(CoreEvent::ClientCommand(Command::TogglePause))
        ));

        let resp = app.clone().oneshot(post_to("/api/seek-by/-15")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(matches!(
            rx.recv().await,
            Some(CoreEvent::ClientCommand(Command::SeekBy { seconds })) if seconds == -15.0
        ));

        let resp = app.oneshot(post_to("/api/seek/-3")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }
}
