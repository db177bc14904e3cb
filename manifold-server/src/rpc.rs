//! The RPC front door: one root object per authenticated WebSocket.
//!
//! Frames use the same `{request-id, type, request, params}` shape the
//! controller clients speak. Dispatch is sequential per connection, so
//! responses appear in request order; up to [`MAX_INFLIGHT`] frames queue
//! behind the one being served. Every request and response is written to
//! the audit log under the connection's conversation id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use manifold_client::params::ModelAbstract;
use manifold_client::proto::{RequestFrame, ResponseFrame};
use manifold_core::{tag, Error, Kind, Relation, Result};
use manifold_store::AuditLogEntry;

use crate::app::{App, AuthenticatedUser};
use crate::ops;
use crate::pubsub::SummaryEvent;

/// Connections are closed after this much silence without a ping.
const PING_TIMEOUT: Duration = Duration::from_secs(90);
/// Ceiling on a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// How long a summary-watcher `Next` waits before returning empty.
const WATCHER_POLL: Duration = Duration::from_secs(50);
/// Requests that may queue on a connection while one is being served.
const MAX_INFLIGHT: usize = 10;

/// Per-connection mutable state.
struct ConnState {
    user: Option<AuthenticatedUser>,
    /// In-flight device login, between LoginDevice and
    /// GetDeviceSessionToken.
    device: Option<manifold_auth::DeviceAuthResponse>,
    /// Principal carried by a validated browser-session cookie.
    cookie_principal: Option<String>,
    conversation_id: String,
    /// Live summary watchers keyed by watcher id.
    watchers: HashMap<String, Watcher>,
}

struct Watcher {
    subscription: u64,
    rx: mpsc::Receiver<SummaryEvent>,
}

/// Serve the control-plane RPC protocol on an upgraded socket.
pub async fn serve_api_socket(app: Arc<App>, socket: WebSocket, cookie_principal: Option<String>) {
    let (mut sink, mut source) = socket.split();
    let mut state = ConnState {
        user: None,
        device: None,
        cookie_principal,
        conversation_id: uuid::Uuid::new_v4().simple().to_string(),
        watchers: HashMap::new(),
    };

    // The reader forwards frames; the bounded channel is the in-flight
    // cap, with WebSocket backpressure behind it.
    let (frames_tx, mut frames_rx) = mpsc::channel::<RequestFrame>(MAX_INFLIGHT);
    let reader = tokio::spawn(async move {
        while let Some(message) = source.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            match serde_json::from_str::<RequestFrame>(&text) {
                Ok(frame) => {
                    if frames_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "dropping malformed request frame");
                }
            }
        }
    });

    let mut deadline = tokio::time::Instant::now() + PING_TIMEOUT;
    loop {
        let frame = tokio::select! {
            frame = frames_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            () = tokio::time::sleep_until(deadline) => {
                tracing::debug!(conversation = %state.conversation_id, "ping timeout, closing connection");
                break;
            }
        };

        if frame.facade == "Pinger" && frame.request == "Ping" {
            deadline = tokio::time::Instant::now() + PING_TIMEOUT;
        }

        let response = serve_frame(&app, &mut state, &frame).await;
        let frame_out = match response {
            Ok(body) => ResponseFrame {
                request_id: frame.request_id,
                response: body,
                error: None,
                error_code: None,
                error_info: None,
            },
            Err(e) => ResponseFrame {
                request_id: frame.request_id,
                response: Value::Null,
                error: Some(e.message().to_string()),
                error_code: Some(e.code().to_string()),
                error_info: None,
            },
        };
        if send_frame(&mut sink, &frame_out).await.is_err() {
            break;
        }
    }

    for watcher in state.watchers.values() {
        app.hub.unsubscribe(watcher.subscription);
    }
    reader.abort();
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &ResponseFrame,
) -> std::result::Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_else(|_| {
        r#"{"request-id":0,"error":"encoding failure","error-code":"error"}"#.to_string()
    });
    sink.send(Message::Text(text.into())).await
}

/// Audit both halves of a call and apply the request ceiling.
///
/// Login payloads carry credentials; they are recorded without params.
async fn serve_frame(app: &App, state: &mut ConnState, frame: &RequestFrame) -> Result<Value> {
    let facade_method = format!("{}.{}", frame.facade, frame.request);
    let sensitive = frame.facade == "Admin";
    let request_payload = if sensitive {
        Value::Null
    } else {
        frame.params.clone()
    };
    record_audit(app, state, frame, &facade_method, false, request_payload, None).await;

    let result = tokio::time::timeout(REQUEST_TIMEOUT, dispatch(app, state, frame)).await;
    let result = match result {
        Ok(result) => result,
        Err(_) => Err(Error::unspecified(format!("{facade_method} timed out"))),
    };

    let (payload, errors) = match &result {
        Ok(_) if sensitive => (Value::Null, None),
        Ok(body) => (body.clone(), None),
        Err(e) => (
            Value::Null,
            Some(json!([{ "code": e.code(), "message": e.message() }])),
        ),
    };
    record_audit(app, state, frame, &facade_method, true, payload, errors).await;
    result
}

async fn record_audit(
    app: &App,
    state: &ConnState,
    frame: &RequestFrame,
    facade_method: &str,
    is_response: bool,
    payload: Value,
    errors: Option<Value>,
) {
    let model = frame
        .params
        .get("model-uuid")
        .or_else(|| frame.params.get("model"))
        .and_then(Value::as_str)
        .map(|m| format!("model-{m}"))
        .unwrap_or_default();
    let entry = AuditLogEntry {
        time: manifold_store::now_micros(),
        conversation_id: state.conversation_id.clone(),
        message_id: frame.request_id as i64,
        identity_tag: state
            .user
            .as_ref()
            .map(AuthenticatedUser::jaas_tag)
            .unwrap_or_default(),
        model,
        facade_method: facade_method.to_string(),
        is_response,
        params: if payload.is_null() { None } else { Some(payload) },
        errors,
    };
    if let Err(e) = app.db.append_audit_entry(&entry).await {
        tracing::warn!(error = %e, "could not write audit entry");
    } else {
        app.metrics.audit_entries.inc();
    }
}

fn param_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::bad_request(format!("missing parameter {key:?}")))
}

fn decode_params<T: serde::de::DeserializeOwned + Default>(params: &Value) -> Result<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone())
        .map_err(|e| Error::bad_request(format!("bad parameters: {e}")))
}

/// `owner/name` or a bare UUID → the model's UUID.
async fn resolve_model_uuid(app: &App, reference: &str) -> Result<String> {
    if tag::is_uuid(reference) {
        return Ok(reference.to_string());
    }
    let tag = app.resolver.resolve(&format!("model-{reference}")).await?;
    Ok(tag.id)
}

fn authenticated(state: &ConnState) -> Result<AuthenticatedUser> {
    state
        .user
        .clone()
        .ok_or_else(|| Error::unauthorized("login required"))
}

fn login_result(app: &App, user: &AuthenticatedUser) -> Value {
    json!({
        "display-name": user.identity.display_name,
        "identity": user.identity.name,
        "controller-tag": format!("controller-{}", app.config.controller_uuid),
        "controller-name": app.config.controller_name,
    })
}

async fn dispatch(app: &App, state: &mut ConnState, frame: &RequestFrame) -> Result<Value> {
    let params = &frame.params;
    match (frame.facade.as_str(), frame.request.as_str()) {
        ("Pinger", "Ping") => Ok(json!({})),

        // ── Login flows ────────────────────────────────────────────────
        ("Admin", "LoginDevice") => {
            let oidc = app
                .oidc
                .as_ref()
                .ok_or_else(|| Error::not_supported("device login is not configured"))?;
            let device = oidc.device().await?;
            state.device = Some(device.clone());
            Ok(serde_json::to_value(&device)
                .map_err(|e| Error::unspecified(format!("encode device response: {e}")))?)
        }
        ("Admin", "GetDeviceSessionToken") => {
            let oidc = app
                .oidc
                .as_ref()
                .ok_or_else(|| Error::not_supported("device login is not configured"))?;
            let device = state
                .device
                .take()
                .ok_or_else(|| Error::bad_request("no device login in progress"))?;
            let tokens = oidc.device_access_token(&device).await?;
            let claims = oidc.extract_and_verify_id_token(&tokens.id_token).await?;
            let principal = oidc.email(&claims)?;
            let user = app.authenticate_principal(&principal).await?;
            let session_token = app.session_tokens.issue(&principal)?;
            state.user = Some(user);
            Ok(json!({ "session-token": session_token }))
        }
        ("Admin", "LoginWithSessionToken") => {
            let token = param_str(params, "session-token")?;
            let principal = app.session_tokens.verify(&token)?;
            let user = app.authenticate_principal(&principal).await?;
            let result = login_result(app, &user);
            state.user = Some(user);
            Ok(result)
        }
        ("Admin", "LoginWithClientCredentials") => {
            let oidc = app
                .oidc
                .as_ref()
                .ok_or_else(|| Error::not_supported("client credentials login is not configured"))?;
            let client_id = param_str(params, "client-id")?;
            let client_secret = param_str(params, "client-secret")?;
            let principal = oidc.client_credentials_login(&client_id, &client_secret).await?;
            let user = app.authenticate_principal(&principal).await?;
            let result = login_result(app, &user);
            state.user = Some(user);
            Ok(result)
        }
        ("Admin", "LoginWithSessionCookie") => {
            let principal = state
                .cookie_principal
                .clone()
                .ok_or_else(|| Error::unauthorized("no session cookie presented"))?;
            let user = app.authenticate_principal(&principal).await?;
            let result = login_result(app, &user);
            state.user = Some(user);
            Ok(result)
        }

        // ── Control-plane operations ───────────────────────────────────
        ("Manifold", method) => {
            let user = authenticated(state)?;
            dispatch_manifold(app, state, &user, method, params).await
        }

        ("ModelSummaryWatcher", "Next") => {
            let _ = authenticated(state)?;
            let id = param_str(params, "watcher-id")?;
            let watcher = state
                .watchers
                .get_mut(&id)
                .ok_or_else(|| Error::not_found(format!("watcher {id:?} not found")))?;
            let mut batch: Vec<ModelAbstract> = Vec::new();
            match tokio::time::timeout(WATCHER_POLL, watcher.rx.recv()).await {
                Ok(Some((_, summary))) => {
                    batch.push(summary);
                    while let Ok((_, summary)) = watcher.rx.try_recv() {
                        batch.push(summary);
                    }
                }
                Ok(None) | Err(_) => {}
            }
            Ok(json!({ "models": batch }))
        }
        ("ModelSummaryWatcher", "Stop") => {
            let _ = authenticated(state)?;
            let id = param_str(params, "watcher-id")?;
            if let Some(watcher) = state.watchers.remove(&id) {
                app.hub.unsubscribe(watcher.subscription);
            }
            Ok(json!({}))
        }

        (facade, method) => Err(Error::not_supported(format!(
            "unknown method {facade}.{method}"
        ))),
    }
}

async fn dispatch_manifold(
    app: &App,
    state: &mut ConnState,
    user: &AuthenticatedUser,
    method: &str,
    params: &Value,
) -> Result<Value> {
    match method {
        "WhoAmI" => Ok(json!({
            "identity": user.identity.name,
            "display-name": user.identity.display_name,
        })),

        // Controllers.
        "AddController" => {
            let req: ops::controller::AddControllerRequest = decode_params(params)?;
            let info = ops::controller::add_controller(app, user, req).await?;
            Ok(serde_json::to_value(info).unwrap_or_default())
        }
        "ListControllers" => {
            let controllers = ops::controller::list_controllers(app, user).await?;
            Ok(json!({ "controllers": controllers }))
        }
        "ControllerInfo" => {
            let name = param_str(params, "name")?;
            let info = ops::controller::controller_info(app, user, &name).await?;
            Ok(serde_json::to_value(info).unwrap_or_default())
        }
        "RemoveController" => {
            let name = param_str(params, "name")?;
            ops::controller::remove_controller(app, user, &name).await?;
            Ok(json!({}))
        }
        "SetControllerDeprecated" => {
            let name = param_str(params, "name")?;
            let deprecated = params
                .get("deprecated")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            ops::controller::set_controller_deprecated(app, user, &name, deprecated).await?;
            Ok(json!({}))
        }

        // Clouds.
        "AddHostedCloud" => {
            let name = param_str(params, "name")?;
            let definition: ops::cloud::CloudDefinition =
                decode_params(params.get("cloud").unwrap_or(&Value::Null))?;
            ops::cloud::add_hosted_cloud(app, user, &name, definition).await?;
            Ok(json!({}))
        }
        "AddCloudToController" => {
            let controller = param_str(params, "controller")?;
            let name = param_str(params, "name")?;
            let definition: ops::cloud::CloudDefinition =
                decode_params(params.get("cloud").unwrap_or(&Value::Null))?;
            ops::cloud::add_cloud_to_controller(app, user, &controller, &name, definition).await?;
            Ok(json!({}))
        }
        "RemoveCloud" => {
            let name = param_str(params, "name")?;
            ops::cloud::remove_cloud(app, user, &name).await?;
            Ok(json!({}))
        }
        "SetCloudDefaults" => {
            let cloud = param_str(params, "cloud")?;
            let region = params.get("region").and_then(Value::as_str);
            let defaults = params
                .get("defaults")
                .and_then(Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            ops::cloud::set_cloud_defaults(app, user, &cloud, region, defaults).await?;
            Ok(json!({}))
        }

        // Models.
        "AddModel" => {
            let req: ops::model::AddModelRequest = decode_params(params)?;
            let summary = ops::model::add_model(app, user, req).await?;
            Ok(serde_json::to_value(summary).unwrap_or_default())
        }
        "ListModels" => {
            let models = ops::model::list_models(app, user).await?;
            Ok(json!({ "models": models }))
        }
        "ImportModel" => {
            let req: ops::model::ImportModelRequest = decode_params(params)?;
            let summary = ops::model::import_model(app, user, req).await?;
            Ok(serde_json::to_value(summary).unwrap_or_default())
        }
        "UpdateMigratedModel" => {
            let model = resolve_model_uuid(app, &param_str(params, "model")?).await?;
            let target = param_str(params, "target-controller")?;
            ops::model::update_migrated_model(app, user, &model, &target).await?;
            Ok(json!({}))
        }
        "InitiateMigration" => {
            let model = resolve_model_uuid(app, &param_str(params, "model")?).await?;
            let target = param_str(params, "target-controller")?;
            let migration_id = ops::model::initiate_migration(app, user, &model, &target).await?;
            Ok(json!({ "migration-id": migration_id }))
        }
        "DestroyModel" => {
            let model = resolve_model_uuid(app, &param_str(params, "model")?).await?;
            ops::model::destroy_model(app, user, &model).await?;
            Ok(json!({}))
        }

        // Access.
        "GrantModelAccess" => {
            let model = resolve_model_uuid(app, &param_str(params, "model")?).await?;
            let principal = param_str(params, "user")?;
            let access = param_str(params, "access")?;
            ops::access::grant_model_access(app, user, &model, &principal, &access).await?;
            Ok(json!({}))
        }
        "RevokeModelAccess" => {
            let model = resolve_model_uuid(app, &param_str(params, "model")?).await?;
            let principal = param_str(params, "user")?;
            let access = param_str(params, "access")?;
            ops::access::revoke_model_access(app, user, &model, &principal, &access).await?;
            Ok(json!({}))
        }
        "GrantRelation" => {
            let object = param_str(params, "object")?;
            let relation = param_str(params, "relation")?;
            let target = param_str(params, "target")?;
            ops::access::grant_relation(app, user, &object, &relation, &target).await?;
            Ok(json!({}))
        }
        "RevokeRelation" => {
            let object = param_str(params, "object")?;
            let relation = param_str(params, "relation")?;
            let target = param_str(params, "target")?;
            ops::access::revoke_relation(app, user, &object, &relation, &target).await?;
            Ok(json!({}))
        }

        // Groups and roles.
        "AddGroup" => {
            let name = param_str(params, "name")?;
            let group = ops::group::add_group(app, user, &name).await?;
            Ok(json!({ "uuid": group.uuid, "name": group.name }))
        }
        "RenameGroup" => {
            let name = param_str(params, "name")?;
            let new_name = param_str(params, "new-name")?;
            ops::group::rename_group(app, user, &name, &new_name).await?;
            Ok(json!({}))
        }
        "RemoveGroup" => {
            let name = param_str(params, "name")?;
            ops::group::remove_group(app, user, &name).await?;
            Ok(json!({}))
        }
        "ListGroups" => {
            let req: ops::group::ListRequest = decode_params(params)?;
            let groups = ops::group::list_groups(app, user, &req).await?;
            let groups: Vec<Value> = groups
                .iter()
                .map(|g| json!({ "uuid": g.uuid, "name": g.name }))
                .collect();
            Ok(json!({ "groups": groups }))
        }
        "AddRole" => {
            let name = param_str(params, "name")?;
            let role = ops::group::add_role(app, user, &name).await?;
            Ok(json!({ "uuid": role.uuid, "name": role.name }))
        }
        "RenameRole" => {
            let name = param_str(params, "name")?;
            let new_name = param_str(params, "new-name")?;
            ops::group::rename_role(app, user, &name, &new_name).await?;
            Ok(json!({}))
        }
        "RemoveRole" => {
            let name = param_str(params, "name")?;
            ops::group::remove_role(app, user, &name).await?;
            Ok(json!({}))
        }
        "ListRoles" => {
            let req: ops::group::ListRequest = decode_params(params)?;
            let roles = ops::group::list_roles(app, user, &req).await?;
            let roles: Vec<Value> = roles
                .iter()
                .map(|r| json!({ "uuid": r.uuid, "name": r.name }))
                .collect();
            Ok(json!({ "roles": roles }))
        }

        // Audit.
        "FindAuditEvents" => {
            let req: ops::audit::AuditLogRequest = decode_params(params)?;
            let events = ops::audit::list_audit_events(app, user, &req).await?;
            Ok(json!({ "events": events }))
        }
        "PurgeLogs" => {
            let before = param_str(params, "before")?;
            let deleted = ops::audit::purge_logs(app, user, &before).await?;
            Ok(json!({ "deleted-count": deleted }))
        }

        // Service accounts.
        "AddServiceAccount" => {
            let client_id = param_str(params, "client-id")?;
            ops::serviceaccount::add_service_account(app, user, &client_id).await?;
            Ok(json!({}))
        }

        // Summary watching.
        "WatchModelSummaries" => {
            let readable = app
                .policy
                .list_objects(&user.tag(), Relation::Reader, Kind::Model, &[])
                .await?;
            let models = readable.into_iter().map(|t| t.id).collect();
            let (subscription, rx) = app.hub.subscribe(Some(models));
            let id = uuid::Uuid::new_v4().to_string();
            state.watchers.insert(id.clone(), Watcher { subscription, rx });
            Ok(json!({ "watcher-id": id }))
        }

        other => Err(Error::not_supported(format!("unknown method Manifold.{other}"))),
    }
}
