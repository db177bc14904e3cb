//! Connection to the plane's RPC endpoint.

use std::path::PathBuf;

use serde_json::{json, Value};

use manifold_client::{connect_websocket, Connection, ControllerTarget};
use manifold_core::{Error, Result};

const MANIFOLD_FACADE_VERSION: u32 = 1;
const ADMIN_FACADE_VERSION: u32 = 3;

/// Where the session token lives between invocations.
pub fn token_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("MANIFOLD_TOKEN_FILE") {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var("HOME")
        .map_err(|_| Error::bad_request("HOME is not set and MANIFOLD_TOKEN_FILE is unset"))?;
    Ok(PathBuf::from(home).join(".config/manifold/session-token"))
}

pub fn store_token(token: &str) -> Result<()> {
    let path = token_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::unspecified(format!("create {}: {e}", parent.display())))?;
    }
    std::fs::write(&path, token)
        .map_err(|e| Error::unspecified(format!("write {}: {e}", path.display())))
}

fn load_token() -> Result<String> {
    if let Ok(token) = std::env::var("MANIFOLD_SESSION_TOKEN") {
        return Ok(token);
    }
    let path = token_path()?;
    std::fs::read_to_string(&path)
        .map(|t| t.trim().to_string())
        .map_err(|_| Error::unauthorized("not logged in, run `manifold login` first"))
}

/// A connected, possibly authenticated, client of the plane.
pub struct PlaneClient {
    conn: Connection,
}

impl PlaneClient {
    /// Open a connection to the plane without logging in.
    pub async fn connect(address: &str, ca_cert: Option<&str>) -> Result<Self> {
        let target = ControllerTarget {
            name: "manifold".to_string(),
            public_address: address.to_string(),
            ca_cert: ca_cert.unwrap_or_default().to_string(),
            ..Default::default()
        };
        let stream = connect_websocket(&target, "api", &http_headers()).await?;
        Ok(Self {
            conn: Connection::start(stream),
        })
    }

    /// Open a connection and present the stored session token.
    pub async fn connect_and_login(address: &str, ca_cert: Option<&str>) -> Result<Self> {
        let client = Self::connect(address, ca_cert).await?;
        let token = load_token()?;
        client
            .conn
            .call(
                "Admin",
                ADMIN_FACADE_VERSION,
                "LoginWithSessionToken",
                json!({ "session-token": token }),
            )
            .await?;
        Ok(client)
    }

    /// Call a method on the control-plane facade.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.conn
            .call("Manifold", MANIFOLD_FACADE_VERSION, method, params)
            .await
    }

    /// Call a method on the login facade.
    pub async fn admin_call(&self, method: &str, params: Value) -> Result<Value> {
        self.conn
            .call("Admin", ADMIN_FACADE_VERSION, method, params)
            .await
    }
}

fn http_headers() -> http::HeaderMap {
    http::HeaderMap::new()
}
