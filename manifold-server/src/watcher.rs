//! Model-summary watcher (one worker per controller).
//!
//! A supervising loop polls the catalog for controllers and keeps one
//! worker per controller alive. Each worker dials its controller, opens a
//! summary watcher, and republishes every batch on the hub — dropping
//! abstracts for models the plane does not track and filtering admin
//! lists down to external principals. Errors are logged and the worker
//! retries on the next supervisor pass; the optional diagnostics channel
//! exists for tests.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use manifold_client::ApiClient;
use manifold_core::{names, Error, Result};
use manifold_store::Controller;

use crate::app::App;

/// Runs the supervisor until the token is cancelled, then waits for every
/// worker to wind down.
pub async fn run_summary_watcher(
    app: Arc<App>,
    cancel: CancellationToken,
    diagnostics: Option<mpsc::Sender<Error>>,
) {
    let interval = Duration::from_secs(app.config.watch_interval_secs.max(1));
    let watched: Arc<DashSet<String>> = Arc::new(DashSet::new());
    let mut workers = JoinSet::new();

    loop {
        match app.db.for_each_controller().await {
            Ok(controllers) => {
                for controller in controllers {
                    if !watched.insert(controller.uuid.clone()) {
                        continue;
                    }
                    let app = app.clone();
                    let cancel = cancel.child_token();
                    let watched = watched.clone();
                    let diagnostics = diagnostics.clone();
                    workers.spawn(async move {
                        let uuid = controller.uuid.clone();
                        if let Err(e) = watch_controller(&app, &controller, &cancel, &diagnostics).await {
                            tracing::warn!(controller = %controller.name, error = %e, "summary watcher stopped");
                            if let Some(tx) = &diagnostics {
                                let _ = tx.send(e).await;
                            }
                        }
                        // Let the next supervisor pass restart the worker.
                        watched.remove(&uuid);
                    });
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not list controllers to watch");
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        // Reap finished workers without blocking.
        while workers.try_join_next().is_some() {}
    }

    while workers.join_next().await.is_some() {}
}

/// One worker: dial, verify support, then pump batches until cancelled.
async fn watch_controller(
    app: &App,
    controller: &Controller,
    cancel: &CancellationToken,
    diagnostics: &Option<mpsc::Sender<Error>>,
) -> Result<()> {
    let api = app.dial_controller(controller).await?;
    if !api.supports_model_summary_watcher() {
        return Err(Error::not_supported(format!(
            "controller {} has no summary watcher",
            controller.name
        )));
    }
    let watcher_id = api.watch_all_model_summaries().await?;

    let result = pump_batches(app, controller, &api, &watcher_id, cancel, diagnostics).await;

    // Best effort; the controller reaps watchers on disconnect anyway.
    if let Err(e) = api.model_summary_watcher_stop(&watcher_id).await {
        tracing::debug!(controller = %controller.name, error = %e, "could not stop summary watcher");
    }
    result
}

async fn pump_batches(
    app: &App,
    controller: &Controller,
    api: &ApiClient,
    watcher_id: &str,
    cancel: &CancellationToken,
    diagnostics: &Option<mpsc::Sender<Error>>,
) -> Result<()> {
    loop {
        let batch = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            batch = api.model_summary_watcher_next(watcher_id) => batch?,
        };
        app.metrics.summary_batches.inc();

        for mut summary in batch {
            // Only models this plane tracks are republished.
            match app
                .db
                .get_model_on_controller(&controller.uuid, &summary.uuid)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    tracing::trace!(model = %summary.uuid, "dropping summary for unknown model");
                    continue;
                }
                Err(e) => {
                    if let Some(tx) = diagnostics {
                        let _ = tx.send(e.clone()).await;
                    }
                    tracing::warn!(error = %e, "summary lookup failed");
                    continue;
                }
            }
            summary
                .admins
                .retain(|admin| names::is_external_principal(admin));
            app.hub.publish(&summary.uuid, &summary);
        }
    }
}
