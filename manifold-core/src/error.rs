//! Error type shared by every Manifold crate.
//!
//! An [`Error`] carries a stable machine-readable [`ErrorKind`] plus a
//! human-readable message. Kinds are mapped once, at the layer that first
//! observes the failure (database driver, policy store, backend controller);
//! outer layers only prepend operation tags via [`Error::op`] and never remap.

use std::fmt;

/// Stable error kinds surfaced as string codes over the RPC interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    AlreadyExists,
    IncompatibleClouds,
    CloudRegionRequired,
    ModelNotFound,
    UpgradeInProgress,
    DatabaseLocked,
    ServerConfiguration,
    NotSupported,
    ConnectionFailed,
    OpenFgaRequestFailed,
    FailedToParseTupleKey,
    FailedToResolveTupleResource,
    /// A code returned by a backend controller, surfaced verbatim.
    Remote(String),
    /// No specific kind; surfaced as the opaque code `error`.
    Unspecified,
}

impl ErrorKind {
    /// The stable string code for this kind.
    pub fn code(&self) -> &str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::IncompatibleClouds => "incompatible-clouds",
            ErrorKind::CloudRegionRequired => "cloud-region-required",
            ErrorKind::ModelNotFound => "model-not-found",
            ErrorKind::UpgradeInProgress => "upgrade-in-progress",
            ErrorKind::DatabaseLocked => "database-locked",
            ErrorKind::ServerConfiguration => "server-configuration",
            ErrorKind::NotSupported => "not-supported",
            ErrorKind::ConnectionFailed => "connection-failed",
            ErrorKind::OpenFgaRequestFailed => "openfga-request-failed",
            ErrorKind::FailedToParseTupleKey => "failed-to-parse-tuple-key",
            ErrorKind::FailedToResolveTupleResource => "failed-to-resolve-tuple-resource",
            ErrorKind::Remote(code) => code,
            ErrorKind::Unspecified => "error",
        }
    }

    /// Reconstruct a kind from a string code. Codes that are not ours are
    /// kept verbatim as [`ErrorKind::Remote`] so backend codes round-trip.
    pub fn from_code(code: &str) -> Self {
        match code {
            "bad-request" => ErrorKind::BadRequest,
            "unauthorized" => ErrorKind::Unauthorized,
            "forbidden" => ErrorKind::Forbidden,
            "not-found" => ErrorKind::NotFound,
            "already-exists" => ErrorKind::AlreadyExists,
            "incompatible-clouds" => ErrorKind::IncompatibleClouds,
            "cloud-region-required" => ErrorKind::CloudRegionRequired,
            "model-not-found" => ErrorKind::ModelNotFound,
            "upgrade-in-progress" => ErrorKind::UpgradeInProgress,
            "database-locked" => ErrorKind::DatabaseLocked,
            "server-configuration" => ErrorKind::ServerConfiguration,
            "not-supported" => ErrorKind::NotSupported,
            "connection-failed" => ErrorKind::ConnectionFailed,
            "openfga-request-failed" => ErrorKind::OpenFgaRequestFailed,
            "failed-to-parse-tuple-key" => ErrorKind::FailedToParseTupleKey,
            "failed-to-resolve-tuple-resource" => ErrorKind::FailedToResolveTupleResource,
            "error" => ErrorKind::Unspecified,
            other => ErrorKind::Remote(other.to_string()),
        }
    }
}

/// An error with a stable kind and a message.
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The stable string code of this error's kind.
    pub fn code(&self) -> &str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prepend an operation tag to the message, keeping the kind.
    ///
    /// Layering convention: the kind is assigned once at the edge; callers
    /// further out only add context.
    pub fn op(mut self, op: &str) -> Self {
        self.message = format!("{op}: {}", self.message);
        self
    }

    // ── Constructors for the common kinds ──────────────────────────────

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn server_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerConfiguration, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupported, message)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, message)
    }

    pub fn upgrade_in_progress(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpgradeInProgress, message)
    }

    pub fn unspecified(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unspecified, message)
    }

    // ── Kind predicates used at decision points ────────────────────────

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound | ErrorKind::ModelNotFound)
            || matches!(&self.kind, ErrorKind::Remote(code) if code == "not-found" || code == "model-not-found")
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ErrorKind::AlreadyExists
            || matches!(&self.kind, ErrorKind::Remote(code) if code == "already-exists")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;
