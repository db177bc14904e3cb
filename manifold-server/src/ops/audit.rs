//! Audit log access and retention.

use serde::{Deserialize, Serialize};

use manifold_core::{Error, Relation, Result};
use manifold_policy::RelationTuple;
use manifold_store::{AuditLogEntry, AuditLogFilter};

use crate::app::{App, AuthenticatedUser};
use crate::ops::ensure_admin;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditLogRequest {
    /// RFC 3339 inclusive lower bound.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub start: String,
    /// RFC 3339 exclusive upper bound.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub end: String,
    #[serde(rename = "identity-tag", default, skip_serializing_if = "String::is_empty")]
    pub identity_tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    /// Most recent first when set.
    #[serde(default)]
    pub reverse: bool,
}

/// An audit event as served over RPC: timestamps in RFC 3339.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub time: String,
    #[serde(rename = "conversation-id")]
    pub conversation_id: String,
    #[serde(rename = "message-id")]
    pub message_id: i64,
    #[serde(rename = "identity-tag")]
    pub identity_tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(rename = "facade-method")]
    pub facade_method: String,
    #[serde(rename = "is-response")]
    pub is_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
}

impl AuditEvent {
    fn from_store(entry: &AuditLogEntry) -> Self {
        Self {
            time: chrono::DateTime::from_timestamp_micros(entry.time)
                .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true))
                .unwrap_or_default(),
            conversation_id: entry.conversation_id.clone(),
            message_id: entry.message_id,
            identity_tag: entry.identity_tag.clone(),
            model: entry.model.clone(),
            facade_method: entry.facade_method.clone(),
            is_response: entry.is_response,
            params: entry.params.clone(),
            errors: entry.errors.clone(),
        }
    }
}

fn parse_time(s: &str, what: &str) -> Result<Option<i64>> {
    if s.is_empty() {
        return Ok(None);
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| Some(t.timestamp_micros()))
        .map_err(|e| Error::bad_request(format!("bad {what} time {s:?}: {e}")))
}

/// Read audit events. Requires the audit-log-viewer capability on the
/// plane, which administrators hold implicitly.
pub async fn list_audit_events(
    app: &App,
    user: &AuthenticatedUser,
    req: &AuditLogRequest,
) -> Result<Vec<AuditEvent>> {
    if !user.admin {
        let probe = RelationTuple::new(
            user.tag(),
            Relation::AuditLogViewer,
            app.resolver.plane_controller_tag(),
        );
        if !app.policy.check(&probe).await? {
            return Err(Error::unauthorized(format!(
                "{} may not read the audit log",
                user.identity.name
            )));
        }
    }

    let filter = AuditLogFilter {
        start: parse_time(&req.start, "start")?,
        end: parse_time(&req.end, "end")?,
        identity_tag: (!req.identity_tag.is_empty()).then(|| req.identity_tag.clone()),
        model: (!req.model.is_empty()).then(|| req.model.clone()),
        method: (!req.method.is_empty()).then(|| req.method.clone()),
        limit: req.limit,
        offset: req.offset,
        newest_first: req.reverse,
    };
    let entries = app.db.list_audit_entries(&filter).await?;
    Ok(entries.iter().map(AuditEvent::from_store).collect())
}

/// Hard-delete audit entries older than the cutoff; returns the count.
pub async fn purge_logs(app: &App, user: &AuthenticatedUser, before: &str) -> Result<u64> {
    ensure_admin(user)?;
    let cutoff = parse_time(before, "cutoff")?
        .ok_or_else(|| Error::bad_request("a cutoff time is required"))?;
    app.db.purge_audit_entries_before(cutoff).await
}
