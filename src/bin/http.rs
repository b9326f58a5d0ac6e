//! Vader HTTP API
//!
//! 启动: cargo run --bin vader-http --features http
//! - POST /execute  `{"skill": "status", "params": {..}}` → CommandResult
//! - GET  /status   → 调度器状态报告

#![cfg(feature = "http")]

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use vader::commands::{CommandResult, Params};
use vader::config::load_config_or_default;
use vader::core::{AgentError, ErrorKind, ShutdownManager, ShutdownReason, StatusReport};
use vader::{observability, Agent};

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    skill: String,
    #[serde(default)]
    params: Params,
}

fn status_code(result: &CommandResult) -> StatusCode {
    match result.kind {
        None => StatusCode::OK,
        Some(ErrorKind::Validation) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::UnknownCommand) => StatusCode::NOT_FOUND,
        Some(ErrorKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn api_execute(
    State(agent): State<Arc<Agent>>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> (StatusCode, Json<CommandResult>) {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            let result = CommandResult::failure(&AgentError::validation(rejection.body_text()));
            return (StatusCode::BAD_REQUEST, Json(result));
        }
    };
    let result = agent.execute(&req.skill, req.params).await;
    (status_code(&result), Json(result))
}

async fn api_status(State(agent): State<Arc<Agent>>) -> Json<StatusReport> {
    Json(agent.status().await)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config_or_default(std::env::args().nth(1).map(PathBuf::from));
    observability::init(&cfg.app.log_level);
    let addr = cfg.http.bind.clone();

    let agent = Arc::new(Agent::builder(cfg).build());
    if let Err(e) = agent.restore().await {
        tracing::warn!(error = %e, "Context restore failed, starting fresh");
    }

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let scheduler = {
        let agent = Arc::clone(&agent);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if let Err(e) = agent.run().await {
                shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
            }
        })
    };

    let app = Router::new()
        .route("/execute", post(api_execute))
        .route("/status", get(api_status))
        .with_state(Arc::clone(&agent));

    tracing::info!("Vader HTTP API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let token = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    agent.stop();
    if let Err(e) = scheduler.await {
        tracing::warn!(error = %e, "Scheduler task join failed");
    }
    agent.shutdown_coordinator(shutdown).run_cleanup().await;
    Ok(())
}
