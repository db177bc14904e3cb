//! The transparent model proxy.
//!
//! Connections to `/<model-uuid>/<tail>` are relayed frame-for-frame to
//! the controller hosting the model, with two exceptions: login requests
//! are rewritten to carry a freshly minted JWT proving the caller's
//! access, and backend refusals that name additional permission
//! requirements trigger a re-mint and a replay of the original request.
//! Either side closing tears the other down.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as BackendMessage;

use manifold_auth::{LoginTarget, TokenMinter};
use manifold_client::proto::{RequestFrame, ResponseFrame};
use manifold_client::{connect_websocket, ControllerTarget};
use manifold_core::{Error, Result};
use manifold_store::{AuditLogEntry, Model};

use crate::access::minter_resolver;
use crate::app::{App, AuthenticatedUser};

/// Error code a backend uses to ask for more permissions.
const ACCESS_REQUIRED: &str = "access required";

/// Relay one client socket to the model's controller.
pub async fn serve_model_proxy(
    app: Arc<App>,
    mut client: WebSocket,
    model_uuid: String,
    tail: String,
) {
    let model = match app.db.get_model(&model_uuid).await {
        Ok(model) => model,
        Err(e) => {
            let frame = ResponseFrame {
                request_id: 0,
                response: Value::Null,
                error: Some(format!("model {model_uuid} not found")),
                error_code: Some(if e.is_not_found() {
                    "not-found".to_string()
                } else {
                    e.code().to_string()
                }),
                error_info: None,
            };
            let _ = client
                .send(ClientMessage::Text(
                    serde_json::to_string(&frame).unwrap_or_default().into(),
                ))
                .await;
            return;
        }
    };

    // The backend socket authenticates through minted JWTs, not the
    // plane's admin credentials.
    let target = ControllerTarget {
        name: model.controller.name.clone(),
        uuid: model.controller.uuid.clone(),
        public_address: model.controller.public_address.clone(),
        addresses: model.controller.addresses.clone(),
        ca_cert: model.controller.ca_cert.clone(),
        tls_hostname: model.controller.tls_hostname.clone(),
        username: String::new(),
        password: String::new(),
    };
    let path = format!("{model_uuid}/{tail}");
    let backend = match connect_websocket(&target, &path, &http::HeaderMap::new()).await {
        Ok(backend) => backend,
        Err(e) => {
            tracing::warn!(model = %model_uuid, error = %e, "could not dial backend for proxy");
            return;
        }
    };

    let minter = TokenMinter::new(
        app.keys.clone(),
        minter_resolver(app.policy.clone(), app.resolver.clone()),
        app.config.controller_name.clone(),
    );
    let mut session = ProxySession {
        app,
        model,
        minter,
        user: None,
        conversation_id: uuid::Uuid::new_v4().simple().to_string(),
        originals: HashMap::new(),
    };

    let (mut backend_tx, mut backend_rx) = backend.split();
    loop {
        tokio::select! {
            message = client.recv() => {
                let Some(Ok(message)) = message else { break };
                match message {
                    ClientMessage::Text(text) => {
                        match session.on_client_frame(text.as_str()).await {
                            Ok(forward) => {
                                if backend_tx
                                    .send(BackendMessage::Text(forward.into()))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "dropping client frame");
                            }
                        }
                    }
                    ClientMessage::Binary(data) => {
                        if backend_tx.send(BackendMessage::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                    ClientMessage::Close(_) => break,
                    _ => {}
                }
                session.app.metrics.proxied_frames.inc();
            }
            message = backend_rx.next() => {
                let Some(Ok(message)) = message else { break };
                match message {
                    BackendMessage::Text(text) => {
                        match session.on_backend_frame(text.as_str()).await {
                            Ok(Forward::ToClient(frame)) => {
                                if client.send(ClientMessage::Text(frame.into())).await.is_err() {
                                    break;
                                }
                            }
                            Ok(Forward::Replay(frame)) => {
                                if backend_tx
                                    .send(BackendMessage::Text(frame.into()))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "dropping backend frame");
                            }
                        }
                    }
                    BackendMessage::Binary(data) => {
                        if client.send(ClientMessage::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                    BackendMessage::Close(_) => break,
                    _ => {}
                }
                session.app.metrics.proxied_frames.inc();
            }
        }
    }
}

enum Forward {
    ToClient(String),
    Replay(String),
}

struct ProxySession {
    app: Arc<App>,
    model: Model,
    minter: TokenMinter,
    user: Option<AuthenticatedUser>,
    conversation_id: String,
    /// Requests in flight to the backend, kept for permission replays.
    originals: HashMap<u64, RequestFrame>,
}

impl ProxySession {
    /// Handle one client → backend frame; returns the text to forward.
    async fn on_client_frame(&mut self, text: &str) -> Result<String> {
        let mut frame: RequestFrame = serde_json::from_str(text)
            .map_err(|e| Error::bad_request(format!("malformed frame: {e}")))?;
        // Login params carry credentials; audit those without payload.
        let payload = if frame.facade == "Admin" {
            Value::Null
        } else {
            frame.params.clone()
        };
        self.audit(&frame, false, payload, None).await;

        if frame.facade == "Admin"
            && matches!(
                frame.request.as_str(),
                "LoginWithSessionToken" | "LoginWithClientCredentials" | "Login"
            )
        {
            if let Some(rewritten) = self.rewrite_login(&frame).await? {
                frame = rewritten;
            }
        }

        self.originals.insert(frame.request_id, frame.clone());
        serde_json::to_string(&frame)
            .map_err(|e| Error::unspecified(format!("encode frame: {e}")))
    }

    /// Authenticate the caller and replace their login with a minted JWT
    /// login the backend understands.
    async fn rewrite_login(&mut self, frame: &RequestFrame) -> Result<Option<RequestFrame>> {
        let principal = if let Some(token) = frame.params.get("session-token").and_then(Value::as_str)
        {
            self.app.session_tokens.verify(token)?
        } else if let Some(client_id) = frame.params.get("client-id").and_then(Value::as_str) {
            let secret = frame
                .params
                .get("client-secret")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let oidc = self
                .app
                .oidc
                .as_ref()
                .ok_or_else(|| Error::not_supported("client credentials login is not configured"))?;
            oidc.client_credentials_login(client_id, secret).await?
        } else {
            // A plain login (e.g. a local user); forwarded untouched.
            return Ok(None);
        };

        let user = self.app.authenticate_principal(&principal).await?;
        let jaas_tag = user.jaas_tag();
        self.user = Some(user);

        let token = self
            .minter
            .make_login_token(LoginTarget {
                user_tag: jaas_tag.clone(),
                model_tag: format!(
                    "model-{}",
                    self.model.uuid.clone().unwrap_or_default()
                ),
                controller_tag: format!("controller-{}", self.model.controller.uuid),
                cloud_tag: format!("cloud-{}", self.model.cloud_region.cloud_name),
                controller_uuid: self.model.controller.uuid.clone(),
            })
            .await?;

        Ok(Some(RequestFrame {
            request_id: frame.request_id,
            facade: "Admin".to_string(),
            version: frame.version,
            request: "Login".to_string(),
            params: json!({
                "auth-tag": jaas_tag,
                "token": base64_token(&token),
            }),
        }))
    }

    /// Handle one backend → client frame.
    async fn on_backend_frame(&mut self, text: &str) -> Result<Forward> {
        let frame: ResponseFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            // Not a response frame (e.g. a watcher burst); forward as-is.
            Err(_) => return Ok(Forward::ToClient(text.to_string())),
        };

        let facade_method = self
            .originals
            .get(&frame.request_id)
            .map(|r| format!("{}.{}", r.facade, r.request))
            .unwrap_or_default();
        let errors = frame.error.as_ref().map(|message| {
            json!([{ "code": frame.error_code.clone().unwrap_or_default(), "message": message }])
        });
        self.audit_response(&facade_method, frame.request_id, frame.response.clone(), errors)
            .await;

        if frame.error_code.as_deref() == Some(ACCESS_REQUIRED) {
            if let Some(original) = self.originals.get(&frame.request_id).cloned() {
                match self.replay_with_token(&frame, original).await {
                    Ok(replay) => return Ok(Forward::Replay(replay)),
                    Err(e) => {
                        tracing::debug!(error = %e, "permission re-mint refused, forwarding error");
                    }
                }
            }
        }

        self.originals.remove(&frame.request_id);
        Ok(Forward::ToClient(text.to_string()))
    }

    /// Mint a token carrying the extra requirements and replay the
    /// original request with it attached.
    async fn replay_with_token(
        &mut self,
        response: &ResponseFrame,
        mut original: RequestFrame,
    ) -> Result<String> {
        let required = response
            .error_info
            .as_ref()
            .and_then(|info| info.get("required-access"))
            .and_then(Value::as_object)
            .ok_or_else(|| Error::bad_request("backend named no required access"))?;
        let mut extra = std::collections::BTreeMap::new();
        for (tag, access) in required {
            let access = access
                .as_str()
                .ok_or_else(|| Error::bad_request("malformed required access"))?;
            extra.insert(tag.clone(), access.to_string());
        }

        let token = self.minter.make_token(&extra).await?;
        if let Some(params) = original.params.as_object_mut() {
            params.insert("token".to_string(), json!(base64_token(&token)));
        } else {
            original.params = json!({ "token": base64_token(&token) });
        }
        serde_json::to_string(&original)
            .map_err(|e| Error::unspecified(format!("encode replay: {e}")))
    }

    async fn audit(&self, frame: &RequestFrame, is_response: bool, payload: Value, errors: Option<Value>) {
        let entry = AuditLogEntry {
            time: manifold_store::now_micros(),
            conversation_id: self.conversation_id.clone(),
            message_id: frame.request_id as i64,
            identity_tag: self
                .user
                .as_ref()
                .map(AuthenticatedUser::jaas_tag)
                .unwrap_or_default(),
            model: format!("model-{}", self.model.uuid.clone().unwrap_or_default()),
            facade_method: format!("{}.{}", frame.facade, frame.request),
            is_response,
            params: if payload.is_null() { None } else { Some(payload) },
            errors,
        };
        if let Err(e) = self.app.db.append_audit_entry(&entry).await {
            tracing::warn!(error = %e, "could not write proxy audit entry");
        } else {
            self.app.metrics.audit_entries.inc();
        }
    }

    async fn audit_response(
        &self,
        facade_method: &str,
        request_id: u64,
        payload: Value,
        errors: Option<Value>,
    ) {
        let entry = AuditLogEntry {
            time: manifold_store::now_micros(),
            conversation_id: self.conversation_id.clone(),
            message_id: request_id as i64,
            identity_tag: self
                .user
                .as_ref()
                .map(AuthenticatedUser::jaas_tag)
                .unwrap_or_default(),
            model: format!("model-{}", self.model.uuid.clone().unwrap_or_default()),
            facade_method: facade_method.to_string(),
            is_response: true,
            params: if payload.is_null() { None } else { Some(payload) },
            errors,
        };
        if let Err(e) = self.app.db.append_audit_entry(&entry).await {
            tracing::warn!(error = %e, "could not write proxy audit entry");
        } else {
            self.app.metrics.audit_entries.inc();
        }
    }
}

fn base64_token(token: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(token)
}
