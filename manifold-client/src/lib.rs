//! # manifold-client — dialing and speaking to backend controllers
//!
//! [`dial`] turns a [`ControllerTarget`] into a connected WebSocket:
//! candidate addresses are tried in declared order (public address first)
//! with a per-attempt timeout, and TLS is verified against a pool holding
//! the controller's CA plus the system roots.
//!
//! [`conn::Connection`] multiplexes JSON-RPC frames over the socket;
//! [`api::ApiClient`] exposes the typed calls the control plane issues.
//! Backend errors surface with their original codes — this crate never
//! remaps them.

pub mod api;
pub mod conn;
pub mod dial;
pub mod params;
pub mod proto;

pub use api::{ApiClient, Dialer, Rpc, WsDialer, SUMMARY_WATCHER_FACADE};
pub use conn::{Connection, WsStream};
pub use dial::{connect_websocket, ControllerTarget, FRAME_BUFFER_SIZE};
