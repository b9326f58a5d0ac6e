//! Vader - 认知周期 Agent
//!
//! 入口：加载配置、初始化日志、恢复上下文，运行主循环直到收到关闭信号。
//! 标准输入每行一条：`{"command": .., "params": {..}}` 立即执行并打印结果，
//! 其他 JSON 对象或纯文本作为输入记录交给下一次 Ingest；`quit` 退出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use vader::config::{load_config, AppConfig};
use vader::context::InputRecord;
use vader::core::{ShutdownManager, ShutdownReason};
use vader::{observability, Agent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (cfg, load_error) = match load_config(config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    observability::init(&cfg.app.log_level);
    if let Some(e) = load_error {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
    }

    let agent = Arc::new(Agent::builder(cfg).build());
    match agent.restore().await {
        Ok(true) => tracing::info!("Context restored from snapshot"),
        Ok(false) => tracing::info!("No context snapshot, starting fresh"),
        Err(e) => tracing::warn!(error = %e, "Context restore failed, starting fresh"),
    }

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    tokio::spawn(read_stdin(Arc::clone(&agent), Arc::clone(&shutdown), shutdown.token()));

    {
        let agent = Arc::clone(&agent);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            shutdown.wait_for_shutdown().await;
            agent.stop();
        });
    }

    let result = agent.run().await;
    if let Err(ref e) = result {
        shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
    }

    agent.shutdown_coordinator(shutdown).run_cleanup().await;
    result.context("Main loop terminated")
}

async fn read_stdin(agent: Arc<Agent>, shutdown: Arc<ShutdownManager>, token: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            shutdown.shutdown(ShutdownReason::UserInitiated);
            break;
        }
        handle_line(&agent, line).await;
    }
}

async fn handle_line(agent: &Agent, line: &str) {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(mut record)) => {
            if let Some(Value::String(command)) = record.get("command").cloned() {
                let params = match record.remove("params") {
                    Some(Value::Object(params)) => params,
                    _ => Default::default(),
                };
                let result = agent.execute(&command, params).await;
                match serde_json::to_string(&result) {
                    Ok(out) => println!("{out}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode result"),
                }
            } else {
                agent.enqueue_input(record).await;
            }
        }
        _ => {
            let mut record = InputRecord::new();
            record.insert("text".into(), json!(line));
            agent.enqueue_input(record).await;
        }
    }
}
