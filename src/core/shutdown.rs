//! 优雅关闭
//!
//! 统一监听 Ctrl+C / SIGTERM，收到信号后：
//! - 请求调度器在下一个迭代边界停止
//! - 强制停止仍在运行的任务
//! - 最后一次持久化上下文

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::context::ContextStore;
use crate::core::TaskTracker;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C 或 quit 命令
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 主循环致命错误
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 关闭 token（交给 HTTP 服务、输入读取等协作方）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭；重复调用只有第一次的原因会被广播
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        tracing::info!(reason = ?reason, "Shutdown triggered");
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理，每项单独限时
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 执行全部清理；若关闭尚未触发则先触发，让仍在监听 token 的协作方退出
    pub async fn run_cleanup(&self) {
        self.manager.shutdown(ShutdownReason::UserInitiated);
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Cleanup task '{}' timed out after {}ms",
                        name,
                        self.timeout.as_millis()
                    );
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }
}

/// 强制停止全部活跃任务
pub struct TaskShutdownCleanup {
    tracker: Arc<TaskTracker>,
}

impl TaskShutdownCleanup {
    pub fn new(tracker: Arc<TaskTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for TaskShutdownCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let stopped = self.tracker.stop_all().await;
        tracing::info!(stopped, "Active tasks stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Tasks"
    }
}

/// 退出前持久化上下文
pub struct ContextPersistCleanup {
    context: Arc<ContextStore>,
}

impl ContextPersistCleanup {
    pub fn new(context: Arc<ContextStore>) -> Self {
        Self { context }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for ContextPersistCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.context.persist().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Context"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{JsonMap, MemoryPersistence};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.shutdown(ShutdownReason::Signal);
        manager.shutdown(ShutdownReason::FatalError("late".into()));
        assert_eq!(rx.recv().await.unwrap(), ShutdownReason::Signal);
        assert!(rx.try_recv().is_err());
    }

    struct MockCleanup {
        called: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl ShutdownCleanup for MockCleanup {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.called.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "MockCleanup"
        }
    }

    #[tokio::test]
    async fn test_coordinator_runs_cleanups() {
        let manager = Arc::new(ShutdownManager::new());
        let mut coordinator = ShutdownCoordinator::new(manager);
        let called = Arc::new(AtomicBool::new(false));
        coordinator.register(MockCleanup {
            called: called.clone(),
        });
        coordinator.run_cleanup().await;
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cleanup_cancels_token_and_keeps_first_reason() {
        let manager = Arc::new(ShutdownManager::new());
        let mut reasons = manager.subscribe();
        let token = manager.token();
        manager.shutdown(ShutdownReason::FatalError("observe".into()));

        ShutdownCoordinator::new(Arc::clone(&manager)).run_cleanup().await;
        assert!(token.is_cancelled());
        assert_eq!(
            reasons.recv().await.unwrap(),
            ShutdownReason::FatalError("observe".into())
        );
        assert!(reasons.try_recv().is_err());

        let idle = Arc::new(ShutdownManager::new());
        ShutdownCoordinator::new(Arc::clone(&idle)).run_cleanup().await;
        assert!(idle.is_shutdown());
    }

    #[tokio::test]
    async fn test_task_and_context_cleanup() {
        let persistence = Arc::new(MemoryPersistence::new());
        let context = Arc::new(ContextStore::default().with_persistence(persistence.clone()));
        let tracker = Arc::new(TaskTracker::new(Arc::clone(&context)));
        tracker.start("scan", JsonMap::new()).await;

        let mut coordinator = ShutdownCoordinator::new(Arc::new(ShutdownManager::new()));
        coordinator.register(TaskShutdownCleanup::new(Arc::clone(&tracker)));
        coordinator.register(ContextPersistCleanup::new(Arc::clone(&context)));
        coordinator.run_cleanup().await;

        assert!(tracker.list().await.is_empty());
        let blob = persistence.blob().await.unwrap();
        assert_eq!(blob["active_tasks"], serde_json::json!([]));
    }
}
