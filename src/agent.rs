//! Agent 运行时
//!
//! 供 stdin 主机与 HTTP 服务调用的统一入口：execute 经注册表分发单条命令，
//! enqueue_input 把外部输入交给下一次 Ingest，run / stop 控制认知周期主循环。

use std::sync::Arc;

use crate::commands::{CommandHandler, CommandRegistry, CommandResult, Params};
use crate::config::{AppConfig, RuntimeConfig};
use crate::context::{ContextStore, InputRecord};
use crate::core::shutdown::{ContextPersistCleanup, TaskShutdownCleanup};
use crate::core::{
    AgentBuilder, AgentError, CycleScheduler, ShutdownCoordinator, ShutdownManager, StatusReport,
    TaskTracker,
};

pub struct Agent {
    config: AppConfig,
    context: Arc<ContextStore>,
    registry: Arc<CommandRegistry>,
    tracker: Arc<TaskTracker>,
    scheduler: Arc<CycleScheduler>,
    runtime_config: Arc<RuntimeConfig>,
}

impl Agent {
    pub(crate) fn new(
        config: AppConfig,
        context: Arc<ContextStore>,
        registry: Arc<CommandRegistry>,
        tracker: Arc<TaskTracker>,
        scheduler: Arc<CycleScheduler>,
        runtime_config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            config,
            context,
            registry,
            tracker,
            scheduler,
            runtime_config,
        }
    }

    pub fn builder(config: AppConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    /// 执行单条命令；错误以 Error 结果返回
    pub async fn execute(&self, command: &str, params: Params) -> CommandResult {
        self.registry.dispatch(command, params).await
    }

    /// 注册宿主自定义命令（技能）
    pub fn register_command(&self, name: impl Into<String>, handler: impl CommandHandler + 'static) {
        self.registry.register(name, handler);
    }

    pub async fn enqueue_input(&self, record: InputRecord) {
        self.context.enqueue_input(record).await;
    }

    /// 从持久化快照恢复上下文；返回是否读到了快照
    pub async fn restore(&self) -> Result<bool, AgentError> {
        self.context.restore().await
    }

    /// 阻塞运行主循环直到 stop() 或致命错误
    pub async fn run(&self) -> Result<(), AgentError> {
        self.scheduler.run().await
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub async fn status(&self) -> StatusReport {
        self.scheduler.status().await
    }

    /// 关闭协调器：先停止全部任务，再持久化上下文
    pub fn shutdown_coordinator(&self, manager: Arc<ShutdownManager>) -> ShutdownCoordinator {
        let mut coordinator = ShutdownCoordinator::new(manager);
        coordinator.register(TaskShutdownCleanup::new(Arc::clone(&self.tracker)));
        coordinator.register(ContextPersistCleanup::new(Arc::clone(&self.context)));
        coordinator
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn runtime_config(&self) -> &Arc<RuntimeConfig> {
        &self.runtime_config
    }

    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    pub fn scheduler(&self) -> &Arc<CycleScheduler> {
        &self.scheduler
    }
}
