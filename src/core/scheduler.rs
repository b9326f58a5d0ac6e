//! 认知周期调度器：Observe → Ingest → Decide → Act → Pace
//!
//! 单一主循环，周期内各步严格串行。Ingest / Decide / Act 处于故障边界之内，错误计数后继续；
//! Observe 与 Pace 中的故障视为致命，循环记录后转为 Stopped 并把控制权交还调用方，不自动重启。
//! stop() 是协作式的：只在每次迭代开始时检查。run() 之前发出的 stop() 同样有效，run() 会立即返回。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};

use crate::commands::CommandRegistry;
use crate::context::{ContextStore, InputRecord};
use crate::core::{
    panic_message, Action, AgentError, AgentPhase, Clock, Decider, ErrorKind, InputProcessor,
    MemoryInputProcessor, NeverAct, RecoveryAction, RecoveryEngine, SchedulerState, StatusReport,
    TokioClock,
};

/// 调度参数
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 最小周期间隔（默认 100ms）
    pub min_interval: Duration,
    /// 单条输入处理超时
    pub input_timeout: Duration,
    /// 每 N 个周期持久化一次上下文；0 表示只在停止时持久化
    pub persist_every: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            input_timeout: Duration::from_secs(5),
            persist_every: 0,
        }
    }
}

/// 跨组件共享的周期统计（status 命令也读取它）
#[derive(Debug, Default)]
pub struct CycleStats {
    cycle_count: AtomicU64,
    last_cycle_ms: AtomicU64,
    error_count: AtomicU64,
}

impl CycleStats {
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    pub fn last_cycle_duration_ms(&self) -> u64 {
        self.last_cycle_ms.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    fn begin_cycle(&self) -> u64 {
        self.cycle_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_duration(&self, elapsed: Duration) {
        self.last_cycle_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self, phase: AgentPhase, scheduler: SchedulerState) -> StatusReport {
        StatusReport {
            phase,
            scheduler,
            cycle_count: self.cycle_count(),
            last_cycle_duration_ms: self.last_cycle_duration_ms(),
            error_count: self.error_count(),
        }
    }
}

pub struct CycleScheduler {
    context: Arc<ContextStore>,
    registry: Arc<CommandRegistry>,
    decider: Arc<dyn Decider>,
    processor: Arc<dyn InputProcessor>,
    clock: Arc<dyn Clock>,
    recovery: RecoveryEngine,
    config: SchedulerConfig,
    stats: Arc<CycleStats>,
    state_tx: watch::Sender<SchedulerState>,
    /// 已请求但尚未被主循环处理的停止
    stop_requested: AtomicBool,
    /// 主循环是否仍在执行（含 stop 之后的收尾）
    active: AtomicBool,
}

impl CycleScheduler {
    pub fn new(context: Arc<ContextStore>, registry: Arc<CommandRegistry>) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            context,
            registry,
            decider: Arc::new(NeverAct),
            processor: Arc::new(MemoryInputProcessor),
            clock: Arc::new(TokioClock),
            recovery: RecoveryEngine::new(),
            config: SchedulerConfig::default(),
            stats: Arc::new(CycleStats::default()),
            state_tx,
            stop_requested: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn with_input_processor(mut self, processor: Arc<dyn InputProcessor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// 与其他组件共享统计对象
    pub fn with_stats(mut self, stats: Arc<CycleStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<CycleStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    /// 订阅调度器状态变化（例如等待 Stopped）
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// 请求停止；在下一次迭代边界生效，Idle 时则让随后的 run() 直接返回
    pub fn stop(&self) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == SchedulerState::Stopped {
                false
            } else {
                *state = SchedulerState::Stopped;
                true
            }
        });
        if changed {
            self.stop_requested.store(true, Ordering::SeqCst);
            tracing::info!("Scheduler stop requested");
        }
    }

    pub async fn status(&self) -> StatusReport {
        self.stats.report(self.context.phase().await, self.state())
    }

    /// 阻塞运行主循环直到 stop() 或致命错误
    ///
    /// 从 Idle 或 Stopped 进入 Running；主循环尚未退出时返回 AlreadyRunning。
    pub async fn run(&self) -> Result<(), AgentError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AgentError::AlreadyRunning);
        }
        self.state_tx.send_replace(SchedulerState::Running);
        tracing::info!(
            min_interval_ms = self.config.min_interval.as_millis() as u64,
            "Scheduler started"
        );
        self.context.set_phase(AgentPhase::Ready).await;

        let result = loop {
            if self.stop_requested.swap(false, Ordering::SeqCst) {
                break Ok(());
            }
            if let Err(e) = self.run_cycle().await {
                tracing::error!(error = %e, kind = ?e.kind(), "Fatal error in main loop");
                break Err(e);
            }
        };

        self.state_tx.send_replace(SchedulerState::Stopped);
        // 致命退出与 stop() 竞争时留下的请求属于本次运行
        self.stop_requested.store(false, Ordering::SeqCst);
        self.context.set_phase(AgentPhase::Stopped).await;
        if let Err(e) = self.context.persist().await {
            tracing::warn!(error = %e, "Failed to persist context on stop");
        }
        tracing::info!(cycles = self.stats.cycle_count(), "Scheduler stopped");
        self.active.store(false, Ordering::SeqCst);
        result
    }

    /// 执行一个完整周期；只有致命错误才返回 Err
    async fn run_cycle(&self) -> Result<(), AgentError> {
        let cycle = self.stats.begin_cycle();
        let mut errors: Vec<AgentError> = Vec::new();

        // 1. Observe
        let started = guard_fatal("observe", async {
            let started = self.clock.now();
            self.context.update().await;
            started
        })
        .await?;

        // 2. Ingest
        let inputs = self.context.drain_pending_inputs().await;
        if !inputs.is_empty() {
            tracing::debug!(cycle, count = inputs.len(), "Processing pending inputs");
        }
        for input in inputs {
            if let Err(e) = self.ingest(input).await {
                tracing::warn!(cycle, error = %e, kind = ?e.kind(), "Input skipped");
                errors.push(e);
            }
        }

        // 3. Decide
        let action = match self.decide().await {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(cycle, error = %e, kind = ?e.kind(), "Decision step failed");
                errors.push(e);
                None
            }
        };

        // 4. Act
        if let Some(action) = action {
            if let Err(e) = self.act(cycle, action).await {
                errors.push(e);
            }
        }

        self.settle(&errors).await?;

        if self.config.persist_every > 0 && cycle % self.config.persist_every == 0 {
            if let Err(e) = self.context.persist().await {
                tracing::warn!(cycle, error = %e, kind = ?e.kind(), "Periodic persist failed");
            }
        }

        // 5. Pace
        guard_fatal("pace", self.pace(started)).await
    }

    async fn ingest(&self, input: InputRecord) -> Result<(), AgentError> {
        let call = AssertUnwindSafe(self.processor.process(input, &self.context, &self.registry))
            .catch_unwind();
        match timeout(self.config.input_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(AgentError::fault(panic_message(panic.as_ref()))),
            Err(_) => Err(AgentError::timeout(
                "input processing",
                self.config.input_timeout.as_millis() as u64,
            )),
        }
    }

    async fn decide(&self) -> Result<Option<Action>, AgentError> {
        let snapshot = self.context.snapshot().await;
        let decider = Arc::clone(&self.decider);
        std::panic::catch_unwind(AssertUnwindSafe(move || decider.decide(&snapshot)))
            .map_err(|panic| AgentError::fault(format!("decision: {}", panic_message(panic.as_ref()))))
    }

    async fn act(&self, cycle: u64, action: Action) -> Result<(), AgentError> {
        let result = self.registry.dispatch(&action.command, action.params).await;
        if result.is_success() {
            tracing::info!(cycle, command = %action.command, "Action succeeded");
            return Ok(());
        }
        let message = result.error_message.unwrap_or_default();
        tracing::warn!(cycle, command = %action.command, error = %message, kind = ?result.kind, "Action failed");
        Err(match result.kind {
            Some(ErrorKind::Validation) => AgentError::Validation(message),
            Some(ErrorKind::UnknownCommand) => AgentError::UnknownCommand(action.command),
            _ => AgentError::HandlerFault(message),
        })
    }

    /// 统计本周期的可恢复错误，并按恢复动作调整 Agent 阶段
    async fn settle(&self, errors: &[AgentError]) -> Result<(), AgentError> {
        let mut degraded = false;
        for e in errors {
            self.stats.record_error();
            match self.recovery.handle(e) {
                RecoveryAction::Continue => {}
                RecoveryAction::Degrade => degraded = true,
                RecoveryAction::Halt => return Err(e.clone()),
            }
        }
        let phase = self.context.phase().await;
        if degraded {
            self.context.set_phase(AgentPhase::Degraded).await;
        } else if phase == AgentPhase::Degraded {
            self.context.set_phase(AgentPhase::Ready).await;
        }
        Ok(())
    }

    async fn pace(&self, started: Instant) {
        let elapsed = self.clock.now().saturating_duration_since(started);
        self.stats.record_duration(elapsed);
        if elapsed < self.config.min_interval {
            self.clock.sleep(self.config.min_interval - elapsed).await;
        }
    }
}

/// Observe / Pace 不在任何故障边界内：其中的 panic 会被转成 FatalLoop
async fn guard_fatal<T>(
    step: &str,
    fut: impl std::future::Future<Output = T>,
) -> Result<T, AgentError> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic| AgentError::FatalLoop(format!("{step}: {}", panic_message(panic.as_ref()))))
}
