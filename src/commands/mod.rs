//! 命令层：注册表、结果信封、内置命令
//!
//! - **registry**: CommandHandler trait 与按名分发的 CommandRegistry
//! - **result**: CommandResult（status / payload / message / kind）
//! - **base**: help、status、start、stop、restart、list、config
//! - **advanced**: trace、surge、debug
//! - **echo**: 原样返回参数（测试用）

pub mod advanced;
pub mod base;
pub mod echo;
pub mod params;
pub mod registry;
pub mod result;

use std::sync::{Arc, Weak};
use std::time::Instant;

use serde_json::json;
use tokio::sync::watch;

use crate::config::RuntimeConfig;
use crate::context::{ContextStore, JsonMap};
use crate::core::{CycleStats, SchedulerState, StatusReport, TaskTracker};

pub use registry::{BlockingHandler, CommandHandler, CommandRegistry, FnHandler};
pub use result::{CommandResult, Outcome};

/// 命令参数
pub type Params = JsonMap;
/// 成功结果的负载
pub type Payload = JsonMap;

/// 内置命令共享的运行时句柄
///
/// 注册表只以 Weak 持有，避免注册表与其中的 help 命令互相持有。
pub struct CommandServices {
    pub context: Arc<ContextStore>,
    pub tracker: Arc<TaskTracker>,
    pub stats: Arc<CycleStats>,
    pub scheduler_state: watch::Receiver<SchedulerState>,
    pub registry: Weak<CommandRegistry>,
    pub config: Arc<RuntimeConfig>,
    pub started_at: Instant,
}

impl CommandServices {
    pub async fn status_report(&self) -> StatusReport {
        let scheduler = *self.scheduler_state.borrow();
        self.stats.report(self.context.phase().await, scheduler)
    }

    pub fn registry(&self) -> Option<Arc<CommandRegistry>> {
        self.registry.upgrade()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// 短期记忆与待处理输入的占用情况
    pub async fn memory_usage(&self) -> serde_json::Value {
        json!({
            "short_term": self.context.memory_len().await,
            "capacity": self.context.memory_capacity(),
            "pending_inputs": self.context.pending_len().await,
        })
    }
}

/// 注册全部内置命令（base + advanced + echo）
pub fn register_builtin(registry: &CommandRegistry, services: Arc<CommandServices>) {
    base::register(registry, Arc::clone(&services));
    advanced::register(registry, services);
    registry.register("echo", echo::EchoCommand);
}
