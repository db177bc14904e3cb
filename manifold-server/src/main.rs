use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use manifold_client::WsDialer;
use manifold_server::config::Config;
use manifold_server::{app::App, http, sweep, watcher};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "manifold exited");
        std::process::exit(1);
    }
}

async fn run() -> manifold_core::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "manifold.yaml".to_string());
    let config = Config::load(&config_path)?;

    let oidc = match &config.oidc {
        Some(oidc_config) => Some(Arc::new(
            manifold_auth::OidcClient::discover(oidc_config.clone()).await?,
        )),
        None => None,
    };

    let app = App::new(config, Arc::new(WsDialer), oidc).await?;
    let cancel = CancellationToken::new();

    let watcher_task = tokio::spawn(watcher::run_summary_watcher(
        app.clone(),
        cancel.child_token(),
        None,
    ));
    let sweeper_task = tokio::spawn(sweep::run_sweepers(app.clone(), cancel.child_token()));

    let listener = tokio::net::TcpListener::bind(&app.config.listen)
        .await
        .map_err(|e| {
            manifold_core::Error::server_configuration(format!(
                "bind {}: {e}",
                app.config.listen
            ))
        })?;
    tracing::info!(listen = %app.config.listen, name = %app.config.controller_name, "manifold serving");

    let router = http::router(app.clone());
    let serve = axum::serve(listener, router).with_graceful_shutdown({
        let cancel = cancel.clone();
        async move { cancel.cancelled().await }
    });

    tokio::select! {
        result = serve => {
            result.map_err(|e| manifold_core::Error::unspecified(format!("serve: {e}")))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    cancel.cancel();
    let _ = watcher_task.await;
    let _ = sweeper_task.await;
    Ok(())
}
