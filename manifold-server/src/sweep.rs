//! Background sweepers: orphaned policy tuples, dying models, audit
//! retention. All of them log failures and carry on; none propagate to
//! user-visible paths.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use manifold_core::Result;
use manifold_policy::TupleFilter;
use manifold_store::Life;

use crate::app::App;

/// Page size of the orphan sweep.
const ORPHAN_PAGE: usize = 20;

/// Run all sweepers on the configured interval until cancelled.
pub async fn run_sweepers(app: Arc<App>, cancel: CancellationToken) {
    let interval = Duration::from_secs(app.config.sweep_interval_secs.max(1));
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }

        match sweep_orphaned_tuples(&app, &cancel).await {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed, "removed orphaned relation tuples");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "orphan sweep failed"),
        }

        if let Err(e) = sweep_dying_models(&app).await {
            tracing::warn!(error = %e, "dying-model sweep failed");
        }

        if app.config.audit_retention_days > 0 {
            let cutoff = manifold_store::now_micros()
                - (app.config.audit_retention_days as i64) * 86_400_000_000;
            match app.db.purge_audit_entries_before(cutoff).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "purged expired audit entries");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "audit retention sweep failed"),
            }
        }
    }
}

/// One pass over the policy store: remove every tuple either of whose
/// endpoints no longer resolves. Pages of twenty tuples; cancellation is
/// honored between pages.
pub async fn sweep_orphaned_tuples(app: &App, cancel: &CancellationToken) -> Result<usize> {
    let mut removed = 0;
    let mut token: Option<String> = None;
    loop {
        if cancel.is_cancelled() {
            return Ok(removed);
        }
        let (page, next) = app
            .policy
            .read_related_objects(&TupleFilter::default(), ORPHAN_PAGE, token.as_deref())
            .await?;
        for tuple in &page {
            let object_gone = app
                .resolver
                .to_jaas_tag(&tuple.object, true)
                .await
                .err()
                .is_some_and(|e| e.is_not_found());
            let target_gone = app
                .resolver
                .to_jaas_tag(&tuple.target, true)
                .await
                .err()
                .is_some_and(|e| e.is_not_found());
            if object_gone || target_gone {
                // The page was read through the everyone translation; map
                // the subject back before removing.
                let mut stored = tuple.clone();
                if stored.object.kind == manifold_core::Kind::User
                    && stored.object.id == manifold_core::EVERYONE_USER
                {
                    stored.object.id = manifold_core::WILDCARD_USER.to_string();
                }
                app.policy.remove_relations(&[stored]).await?;
                removed += 1;
            }
        }
        match next {
            Some(next) => token = Some(next),
            None => return Ok(removed),
        }
    }
}

/// One pass over dying models: probe each model's controller and delete
/// the record once the backend reports the model gone.
pub async fn sweep_dying_models(app: &App) -> Result<usize> {
    let mut removed = 0;
    for model in app.db.models_with_life(Life::Dying).await? {
        let Some(uuid) = model.uuid.clone() else {
            continue;
        };
        let api = match app.dial_controller(&model.controller).await {
            Ok(api) => api,
            Err(e) => {
                tracing::debug!(model = %uuid, error = %e, "dying-model probe could not dial");
                continue;
            }
        };
        match api.model_info(&uuid).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                app.db.delete_model(&model.id).await?;
                app.policy.remove_model(&uuid).await?;
                for offer in &model.offers {
                    app.policy.remove_application_offer(&offer.uuid).await?;
                }
                removed += 1;
                tracing::info!(model = %uuid, "reaped dying model");
            }
            Err(e) => {
                tracing::debug!(model = %uuid, error = %e, "dying-model probe failed");
            }
        }
    }
    Ok(removed)
}
