//! 命令注册表
//!
//! 所有命令实现 CommandHandler trait，由 CommandRegistry 按名注册与查找；
//! dispatch 在超时与 panic 捕获的故障边界内调用处理器，任何故障都转为 Error 结果，
//! 每次调用输出结构化审计日志（JSON）。

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::time::timeout;

use crate::commands::{CommandResult, Params, Payload};
use crate::core::{panic_message, AgentError};

const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// 命令处理器：接收命令名与参数映射，返回负载或错误
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// 命令描述（help 命令展示）
    fn description(&self) -> &str {
        ""
    }

    async fn invoke(&self, command: &str, params: Params) -> Result<Payload, AgentError>;
}

/// 将同步闭包包装为处理器，在当前任务内直接执行
pub struct FnHandler<F> {
    f: F,
    description: String,
}

impl<F> FnHandler<F>
where
    F: Fn(Params) -> Result<Payload, AgentError> + Send + Sync,
{
    pub fn new(description: impl Into<String>, f: F) -> Self {
        Self {
            f,
            description: description.into(),
        }
    }
}

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(Params) -> Result<Payload, AgentError> + Send + Sync,
{
    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        (self.f)(params)
    }
}

/// 会同步阻塞的处理器：放到 blocking 线程池执行，使超时仍然生效
pub struct BlockingHandler<F> {
    f: Arc<F>,
    description: String,
}

impl<F> BlockingHandler<F>
where
    F: Fn(Params) -> Result<Payload, AgentError> + Send + Sync + 'static,
{
    pub fn new(description: impl Into<String>, f: F) -> Self {
        Self {
            f: Arc::new(f),
            description: description.into(),
        }
    }
}

#[async_trait]
impl<F> CommandHandler for BlockingHandler<F>
where
    F: Fn(Params) -> Result<Payload, AgentError> + Send + Sync + 'static,
{
    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f(params)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(AgentError::fault(panic_message(e.into_panic().as_ref()))),
            Err(e) => Err(AgentError::fault(e.to_string())),
        }
    }
}

/// 命令注册表：按名称存储 Arc<dyn CommandHandler>；名称解析发生在 dispatch 时
pub struct CommandRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
    timeout: Duration,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// 设置单次处理器调用超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 绑定名称；重复注册覆盖旧绑定并记录警告
    pub fn register(&self, name: impl Into<String>, handler: impl CommandHandler + 'static) {
        self.register_arc(name, Arc::new(handler));
    }

    pub fn register_arc(&self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        let name = name.into();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), handler);
        if previous.is_some() {
            tracing::warn!(command = %name, "Command re-registered, previous handler replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 已注册命令名（排序）
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// 命令名 → 描述，用于 help
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, h)| (name.clone(), h.description().to_string()))
            .collect()
    }

    /// 解析并调用命令；永不向调用方抛出故障
    pub async fn dispatch(&self, name: &str, params: Params) -> CommandResult {
        let start = Instant::now();
        let params_preview = params_preview(&params);

        let result = match self.get(name) {
            Some(handler) => self.invoke_guarded(name, handler, params).await,
            None => Err(AgentError::UnknownCommand(name.to_string())),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "command_audit",
            "command": name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "kind": result.as_ref().err().map(|e| e.kind()),
            "duration_ms": start.elapsed().as_millis() as u64,
            "params_preview": params_preview,
        });
        tracing::info!(audit = %audit, "command");

        CommandResult::from(result)
    }

    async fn invoke_guarded(
        &self,
        name: &str,
        handler: Arc<dyn CommandHandler>,
        params: Params,
    ) -> Result<Payload, AgentError> {
        let call = AssertUnwindSafe(handler.invoke(name, params)).catch_unwind();
        match timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(AgentError::fault(panic_message(panic.as_ref()))),
            Err(_) => Err(AgentError::timeout(
                format!("command '{name}'"),
                self.timeout.as_millis() as u64,
            )),
        }
    }
}

fn params_preview(params: &Params) -> String {
    let s = serde_json::Value::Object(params.clone()).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
