//! # manifold-auth — who is on the other end of the socket
//!
//! Four concerns, one crate:
//!
//! - [`oidc`] — the device-authorization and client-credentials flows
//!   against the external OpenID Connect provider, plus id-token
//!   verification and the email → principal convention.
//! - [`session`] — session tokens handed to the CLI and browser-session
//!   cookies with sliding expiry.
//! - [`keys`] / [`minter`] — the plane's own RSA key pair and the minter
//!   producing short-lived access tokens for backend controllers.
//! - [`jwks`] — JWKS caching for provider-issued tokens.

pub mod jwks;
pub mod keys;
pub mod minter;
pub mod oidc;
pub mod session;

pub use jwks::JwksCache;
pub use keys::SigningKeyPair;
pub use minter::{AccessResolver, LoginTarget, TokenMinter, TOKEN_TTL};
pub use oidc::{DeviceAuthResponse, OidcClient, OidcConfig, ProviderTokens};
pub use session::{
    insecure_subject, BrowserSession, CookieSessionService, SessionTokenService, SESSION_COOKIE,
};
