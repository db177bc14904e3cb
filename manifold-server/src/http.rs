//! HTTP surface: the three WebSocket endpoints plus status and metrics.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use manifold_auth::SESSION_COOKIE;
use manifold_client::FRAME_BUFFER_SIZE;

use crate::app::App;
use crate::proxy::serve_model_proxy;
use crate::rpc::serve_api_socket;

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/api", get(api_socket))
        .route("/metrics", get(metrics))
        .route("/debug/status", get(status))
        .route("/auth/whoami", get(whoami))
        .route("/commands/{uuid}", get(commands_redirect))
        .route("/{uuid}/{*tail}", get(model_proxy))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app)
}

/// The browser-session cookie's principal, if one is presented and valid.
fn cookie_principal(app: &App, headers: &HeaderMap) -> Option<(String, Option<String>)> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    let value = cookies.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })?;
    let (session, refreshed) = app.cookies.verify(&value).ok()?;
    Some((session.principal, refreshed))
}

async fn api_socket(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let principal = cookie_principal(&app, &headers).map(|(principal, _)| principal);
    ws.write_buffer_size(FRAME_BUFFER_SIZE)
        .on_upgrade(move |socket| serve_api_socket(app, socket, principal))
}

async fn model_proxy(
    State(app): State<Arc<App>>,
    Path((uuid, tail)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.write_buffer_size(FRAME_BUFFER_SIZE)
        .on_upgrade(move |socket| serve_model_proxy(app, socket, uuid, tail))
}

/// Legacy endpoint: answer with the controller's own address and close.
async fn commands_redirect(
    State(app): State<Arc<App>>,
    Path(uuid): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let address = match app.db.get_model(&uuid).await {
            Ok(model) => {
                if model.controller.public_address.is_empty() {
                    model.controller.addresses.first().cloned().unwrap_or_default()
                } else {
                    model.controller.public_address.clone()
                }
            }
            Err(_) => String::new(),
        };
        let frame = if address.is_empty() {
            json!({ "error": "model not found", "error-code": "not-found" })
        } else {
            json!({ "redirect-to": format!("wss://{address}/model/{uuid}/commands") })
        };
        let _ = socket
            .send(Message::Text(frame.to_string().into()))
            .await;
        let _ = socket.send(Message::Close(None)).await;
    })
}

/// Browser-session check with sliding refresh.
async fn whoami(State(app): State<Arc<App>>, headers: HeaderMap) -> Response {
    match cookie_principal(&app, &headers) {
        Some((principal, refreshed)) => {
            let body = Json(json!({ "identity": principal }));
            match refreshed {
                Some(cookie) => {
                    let set_cookie = format!(
                        "{SESSION_COOKIE}={cookie}; Path=/; HttpOnly; Secure; SameSite=Strict"
                    );
                    ([(header::SET_COOKIE, set_cookie)], body).into_response()
                }
                None => body.into_response(),
            }
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "no valid session", "error-code": "unauthorized" })),
        )
            .into_response(),
    }
}

async fn status(State(app): State<Arc<App>>) -> Response {
    let controllers = app.db.count_controllers().await.unwrap_or(-1);
    let models = app.db.count_models().await.unwrap_or(-1);
    Json(json!({
        "controller-name": app.config.controller_name,
        "controller-uuid": app.config.controller_uuid,
        "controllers": controllers,
        "models": models,
    }))
    .into_response()
}

async fn metrics(State(app): State<Arc<App>>) -> Response {
    match app.metrics.gather() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.message().to_string()).into_response(),
    }
}
