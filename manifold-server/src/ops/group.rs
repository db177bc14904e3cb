//! Group and role administration. Removal cascades through the policy
//! store so no tuple mentioning the removed entity survives.

use serde::{Deserialize, Serialize};

use manifold_core::Result;
use manifold_store::{GroupEntry, RoleEntry};

use crate::app::{App, AuthenticatedUser};
use crate::ops::ensure_admin;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "match")]
    pub name_match: String,
}

impl ListRequest {
    fn limit(&self) -> i64 {
        if self.limit > 0 {
            self.limit
        } else {
            50
        }
    }

    fn name_match(&self) -> Option<&str> {
        if self.name_match.is_empty() {
            None
        } else {
            Some(&self.name_match)
        }
    }
}

// ── Groups ───────────────────────────────────────────────────────────────

pub async fn add_group(app: &App, user: &AuthenticatedUser, name: &str) -> Result<GroupEntry> {
    ensure_admin(user)?;
    app.db.add_group(name).await
}

pub async fn rename_group(
    app: &App,
    user: &AuthenticatedUser,
    name: &str,
    new_name: &str,
) -> Result<()> {
    ensure_admin(user)?;
    let group = app.db.get_group_by_name(name).await?;
    app.db.rename_group(&group.uuid, new_name).await
}

/// Remove a group and every tuple that mentions it, atomically from the
/// caller's point of view: the group row goes first, then the policy
/// cascade.
pub async fn remove_group(app: &App, user: &AuthenticatedUser, name: &str) -> Result<()> {
    ensure_admin(user)?;
    let group = app.db.get_group_by_name(name).await?;
    app.db.remove_group(&group.uuid).await?;
    app.policy.remove_group(&group.uuid).await
}

pub async fn list_groups(
    app: &App,
    user: &AuthenticatedUser,
    req: &ListRequest,
) -> Result<Vec<GroupEntry>> {
    ensure_admin(user)?;
    app.db
        .list_groups(req.limit(), req.offset, req.name_match())
        .await
}

// ── Roles ────────────────────────────────────────────────────────────────

pub async fn add_role(app: &App, user: &AuthenticatedUser, name: &str) -> Result<RoleEntry> {
    ensure_admin(user)?;
    app.db.add_role(name).await
}

pub async fn rename_role(
    app: &App,
    user: &AuthenticatedUser,
    name: &str,
    new_name: &str,
) -> Result<()> {
    ensure_admin(user)?;
    let role = app.db.get_role_by_name(name).await?;
    app.db.rename_role(&role.uuid, new_name).await
}

pub async fn remove_role(app: &App, user: &AuthenticatedUser, name: &str) -> Result<()> {
    ensure_admin(user)?;
    let role = app.db.get_role_by_name(name).await?;
    app.db.remove_role(&role.uuid).await?;
    app.policy.remove_role(&role.uuid).await
}

pub async fn list_roles(
    app: &App,
    user: &AuthenticatedUser,
    req: &ListRequest,
) -> Result<Vec<RoleEntry>> {
    ensure_admin(user)?;
    app.db
        .list_roles(req.limit(), req.offset, req.name_match())
        .await
}
