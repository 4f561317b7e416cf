use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};

use backporter_server::config::Config;
use backporter_server::executor::{CommandExecutor, SystemRunner};
use backporter_server::git::WorkingTree;
use backporter_server::webhook::webhook_router;
use backporter_server::{
    get_bot_version, AppState, BackportEngine, Debouncer, GitHubClient, RecordingLogger,
    RepositoryClient,
};

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "backporter",
        "version": get_bot_version(),
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting backporter {}", get_bot_version());

    let config = Config::from_env().context("Failed to load configuration")?;

    let recording_logger = if config.recording_enabled {
        match RecordingLogger::new(PathBuf::from(&config.recording_log_path)) {
            Ok(logger) => {
                info!(
                    "Recording enabled, logging to: {}",
                    config.recording_log_path
                );
                Some(logger)
            }
            Err(e) => {
                error!("Failed to initialize recording logger: {}", e);
                None
            }
        }
    } else {
        None
    };

    let client: Arc<dyn RepositoryClient> = Arc::new(GitHubClient::new_with_recording(
        &config.upstream,
        &config.main_branch,
        config.github_token.clone(),
        recording_logger.clone(),
    )?);

    let identity = client
        .current_user()
        .await
        .context("Failed to look up the bot account")?;

    let executor = Arc::new(
        CommandExecutor::new(
            Arc::new(SystemRunner::new(config.command_timeout)),
            &config.working_dir,
        )
        .with_recording(recording_logger.clone()),
    );
    let tree = Arc::new(WorkingTree::new(executor, &config.main_branch));
    tree.initialize(
        &identity,
        &config.github_token,
        &config.fork,
        &config.upstream,
        &config.default_email,
    )
    .await
    .context("Failed to prepare the working tree")?;

    let engine = Arc::new(BackportEngine::new(
        client.clone(),
        tree,
        config.fork_owner(),
    ));
    let debouncer = Debouncer::spawn(config.debounce, move || {
        let engine = engine.clone();
        async move {
            match engine.run_cycle().await {
                Ok(report) => info!(
                    "Backport cycle: {} created, {} abandoned",
                    report.created().count(),
                    report.abandoned.len()
                ),
                Err(e) => error!("Backport cycle failed: {}", e),
            }
        }
    });
    // Catch up on anything merged while the bot was down
    debouncer.trigger();

    let app_state = Arc::new(AppState {
        client,
        debouncer,
        webhook_secret: config.github_webhook_secret.clone(),
        upstream: config.upstream.clone(),
        main_branch: config.main_branch.clone(),
        recording_logger,
    });

    if let Some(interval) = config.poll_interval {
        info!("Polling for backports every {:?}", interval);
        let polling_state = app_state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; startup already triggered
            ticker.tick().await;
            loop {
                ticker.tick().await;
                polling_state.debouncer.trigger();
            }
        });
    }

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
