//! Dialing a controller: candidate addresses in order, per-attempt
//! timeouts, and TLS against the controller's own CA plus system roots.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use http::HeaderMap;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};

use manifold_core::{Error, Result};

use crate::conn::WsStream;

/// Frame buffer size, read and write. Sized so naive peers that do not
/// reassemble fragments still interoperate.
pub const FRAME_BUFFER_SIZE: usize = 64 * 1024;

/// Timeout for one address attempt.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for the dial as a whole.
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to reach one controller.
#[derive(Clone, Debug, Default)]
pub struct ControllerTarget {
    pub name: String,
    pub uuid: String,
    /// Preferred address, tried first when present.
    pub public_address: String,
    /// Remaining `host:port` candidates, in declared order.
    pub addresses: Vec<String>,
    /// PEM text of the controller CA; empty to rely on system roots.
    pub ca_cert: String,
    /// Hostname to present for TLS verification; defaults to the dialed
    /// host.
    pub tls_hostname: String,
    /// Basic-auth admin credentials, when dialing as the plane itself.
    pub username: String,
    pub password: String,
}

impl ControllerTarget {
    /// Candidate addresses in dialing order.
    pub fn candidates(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.addresses.len() + 1);
        if !self.public_address.is_empty() {
            out.push(self.public_address.clone());
        }
        for address in &self.addresses {
            if !out.contains(address) {
                out.push(address.clone());
            }
        }
        out
    }
}

/// Build the TLS configuration: system roots plus the controller CA.
fn tls_config(ca_cert: &str) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        // Unusable system certificates are skipped, not fatal.
        let _ = roots.add(cert);
    }
    if !ca_cert.is_empty() {
        let mut reader = std::io::BufReader::new(ca_cert.as_bytes());
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert =
                cert.map_err(|e| Error::bad_request(format!("parse controller CA: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| Error::bad_request(format!("bad controller CA: {e}")))?;
        }
    }
    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Open a WebSocket to `path` on the controller, trying each candidate
/// address in order. Returns the socket of the first success; fails only
/// after every address has failed.
pub async fn connect_websocket(
    target: &ControllerTarget,
    path: &str,
    extra_headers: &HeaderMap,
) -> Result<WsStream> {
    let candidates = target.candidates();
    if candidates.is_empty() {
        return Err(Error::bad_request(format!(
            "controller {} has no addresses",
            target.name
        )));
    }
    let tls = Arc::new(tls_config(&target.ca_cert)?);
    let config = WebSocketConfig::default()
        .read_buffer_size(FRAME_BUFFER_SIZE)
        .write_buffer_size(FRAME_BUFFER_SIZE);

    let overall = tokio::time::Instant::now() + DIAL_TIMEOUT;
    let mut last_error = Error::connection_failed("no address attempted");
    for address in &candidates {
        if tokio::time::Instant::now() >= overall {
            break;
        }
        match tokio::time::timeout(
            ATTEMPT_TIMEOUT,
            attempt(target, address, path, extra_headers, tls.clone(), config),
        )
        .await
        {
            Ok(Ok(stream)) => {
                tracing::debug!(controller = %target.name, %address, "dialed controller");
                return Ok(stream);
            }
            Ok(Err(e)) => {
                tracing::debug!(controller = %target.name, %address, error = %e, "dial attempt failed");
                last_error = e;
            }
            Err(_) => {
                last_error =
                    Error::connection_failed(format!("dial {address}: attempt timed out"));
            }
        }
    }
    Err(last_error.op("dial-controller"))
}

async fn attempt(
    target: &ControllerTarget,
    address: &str,
    path: &str,
    extra_headers: &HeaderMap,
    tls: Arc<ClientConfig>,
    config: WebSocketConfig,
) -> Result<WsStream> {
    let url = format!("wss://{address}/{}", path.trim_start_matches('/'));
    let mut request = url
        .clone()
        .into_client_request()
        .map_err(|e| Error::bad_request(format!("bad controller address {address:?}: {e}")))?;

    for (name, value) in extra_headers {
        request.headers_mut().insert(name.clone(), value.clone());
    }
    if !target.username.is_empty() {
        let token = STANDARD.encode(format!("{}:{}", target.username, target.password));
        let value = format!("Basic {token}")
            .parse()
            .map_err(|_| Error::bad_request("credentials are not header-safe"))?;
        request.headers_mut().insert(http::header::AUTHORIZATION, value);
    }
    if !target.tls_hostname.is_empty() {
        // Verify the certificate against the configured hostname even when
        // dialing by IP.
        ServerName::try_from(target.tls_hostname.clone())
            .map_err(|e| Error::bad_request(format!("bad tls hostname: {e}")))?;
        let value = target
            .tls_hostname
            .parse()
            .map_err(|_| Error::bad_request("tls hostname is not header-safe"))?;
        request.headers_mut().insert(http::header::HOST, value);
    }

    let (stream, _response) = connect_async_tls_with_config(
        request,
        Some(config),
        false,
        Some(Connector::Rustls(tls)),
    )
    .await
    .map_err(|e| Error::connection_failed(format!("dial {url}: {e}")))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_address_is_first_candidate() {
        let target = ControllerTarget {
            public_address: "public.example.com:17070".to_string(),
            addresses: vec![
                "10.0.0.1:17070".to_string(),
                "public.example.com:17070".to_string(),
                "10.0.0.2:17070".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(
            target.candidates(),
            [
                "public.example.com:17070",
                "10.0.0.1:17070",
                "10.0.0.2:17070"
            ]
        );
    }

    #[test]
    fn no_addresses_is_rejected_up_front() {
        let target = ControllerTarget::default();
        assert!(target.candidates().is_empty());
    }
}
