use std::path::Path;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, State};
use axum::handler::HandlerWithoutStateExt;
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use rust_embed::Embed;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::hub::HubHandle;
use crate::protocol::Command;

const FALLBACK_IMAGE: &str = "fallback.svg";

#[derive(Embed)]
#[folder = "src/assets/"]
struct Assets;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    /// Viewer commands join the socket commands on the router's queue.
    pub commands: mpsc::Sender<Command>,
}

pub async fn start_server(
    state: AppState,
    data_dir: &Path,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state, data_dir))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

fn app(state: AppState, data_dir: &Path) -> Router {
    let data = ServeDir::new(data_dir).fallback(missing_data_handler.into_service());

    Router::new()
        .route("/", get(index_handler))
        .route("/assets/{*path}", get(static_handler))
        .route("/api", get(websocket_handler))
        .nest_service("/data", data)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler() -> impl IntoResponse {
    match Assets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "index.html not found").into_response(),
    }
}

async fn static_handler(UrlPath(path): UrlPath<String>) -> impl IntoResponse {
    embedded(&path).unwrap_or_else(|| (StatusCode::NOT_FOUND, "not found").into_response())
}

/// Screenshots do not exist until the first detection cycle; viewers get a
/// placeholder instead of a broken image.
async fn missing_data_handler(uri: Uri) -> Response {
    if uri.path().ends_with(".png") {
        if let Some(response) = embedded(FALLBACK_IMAGE) {
            return response;
        }
    }
    (StatusCode::NOT_FOUND, "not found").into_response()
}

fn embedded(path: &str) -> Option<Response> {
    let content = Assets::get(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Some(
        (
            [
                (header::CONTENT_TYPE, mime.as_ref()),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            content.data.to_vec(),
        )
            .into_response(),
    )
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let Some(viewer) = state.hub.register().await else {
        tracing::debug!("hub stopped, refusing viewer");
        return;
    };
    let id = viewer.id;
    let mut events = viewer.events;
    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(viewer = id, error = %e, "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        // evicted or hub stopped
        let _ = sender.close().await;
    });

    let commands = state.commands.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match Command::from_json(text.as_str()) {
                    Ok(command) => {
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(viewer = id, error = %e, "ignoring viewer message"),
                },
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(viewer = id, error = %e, "websocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    first_to_finish(send_task, recv_task).await;
    state.hub.unregister(id);
}

/// Waits for either task and aborts the other.
async fn first_to_finish(mut a: JoinHandle<()>, mut b: JoinHandle<()>) {
    tokio::select! {
        _ = &mut a => b.abort(),
        _ = &mut b => a.abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn missing_screenshot_gets_placeholder() {
        let response = missing_data_handler(Uri::from_static("/screenshot-detected.png")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/svg+xml");
    }

    #[tokio::test]
    async fn other_missing_files_are_not_found() {
        let response = missing_data_handler(Uri::from_static("/stats.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn finished_task_cancels_its_peer() {
        let (held, released) = tokio::sync::oneshot::channel::<()>();
        let done = tokio::spawn(async {});
        let pending = tokio::spawn(async move {
            let _held = held;
            std::future::pending::<()>().await;
        });

        first_to_finish(pending, done).await;
        // the aborted task dropped its sender
        assert!(tokio::time::timeout(Duration::from_secs(5), released)
            .await
            .unwrap()
            .is_err());
    }

    #[test]
    fn viewer_page_is_embedded() {
        assert!(Assets::get("index.html").is_some());
        assert!(embedded("viewer.js").is_some());
    }
}
