use std::{net::SocketAddr, process};

use axum::{Json, Router, http::StatusCode, routing::get};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

use varco::{
    application::error::AppError,
    config,
    infra::{
        error::InfraError,
        http::{EdgeState, apply_edge_pipeline},
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (_cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;
    run_serve(settings).await
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = EdgeState::from_settings(&settings);
    let app = apply_edge_pipeline(demo_upstream(), state);

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(target = "varco::serve", addr = %settings.server.addr, "edge listener started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| AppError::from(InfraError::from(err)))?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(target = "varco::serve", "shutdown signal received"),
        Err(err) => {
            error!(target = "varco::serve", error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

/// Stand-in for the CRUD collaborator: a few representative public content
/// reads plus a health probe. The edge stages treat these handlers as
/// opaque; a real deployment mounts its own router here instead.
fn demo_upstream() -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/articles", get(list_articles))
        .route("/api/v1/staff", get(list_staff))
        .route("/api/v1/settings", get(site_settings))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn list_articles() -> Json<Value> {
    Json(json!({
        "data": [
            { "id": 1, "title": "Term dates announced", "status": "published" },
            { "id": 2, "title": "Library wing reopens", "status": "published" },
        ],
    }))
}

async fn list_staff() -> Json<Value> {
    Json(json!({
        "data": [
            { "id": 1, "name": "A. Moreau", "department": "Science" },
            { "id": 2, "name": "J. Okafor", "department": "Humanities" },
        ],
    }))
}

async fn site_settings() -> Json<Value> {
    Json(json!({
        "data": { "site_name": "Demo Campus", "locale": "en" },
    }))
}
