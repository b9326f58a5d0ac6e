//! Agent 构建器：统一的 Agent 初始化逻辑
//!
//! stdin 主机、HTTP 服务与测试共用同一套组装：上下文存储、命令注册表（含内置命令）、
//! 任务追踪器与周期调度器。

use std::sync::Arc;
use std::time::Instant;

use crate::agent::Agent;
use crate::commands::{register_builtin, CommandRegistry, CommandServices};
use crate::config::{AppConfig, RuntimeConfig};
use crate::context::{
    ContextPersistence, ContextStore, EnvironmentSampler, JsonFilePersistence, ProcessSampler,
};
use crate::core::{Clock, CycleScheduler, Decider, InputProcessor, TaskControl, TaskTracker};

pub struct AgentBuilder {
    config: AppConfig,
    decider: Option<Arc<dyn Decider>>,
    sampler: Option<Arc<dyn EnvironmentSampler>>,
    processor: Option<Arc<dyn InputProcessor>>,
    persistence: Option<Arc<dyn ContextPersistence>>,
    clock: Option<Arc<dyn Clock>>,
    controls: Vec<(String, Arc<dyn TaskControl>)>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            decider: None,
            sampler: None,
            processor: None,
            persistence: None,
            clock: None,
            controls: Vec::new(),
        }
    }

    /// 决策函数；默认 NeverAct
    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// 环境采样器；默认 ProcessSampler
    pub fn with_sampler(mut self, sampler: Arc<dyn EnvironmentSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// 输入处理器；默认 MemoryInputProcessor
    pub fn with_input_processor(mut self, processor: Arc<dyn InputProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// 上下文持久化；未设置时按 [persistence] 配置使用 JSON 文件
    pub fn with_persistence(mut self, persistence: Arc<dyn ContextPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_task_control(mut self, kind: impl Into<String>, control: Arc<dyn TaskControl>) -> Self {
        self.controls.push((kind.into(), control));
        self
    }

    fn build_context(&mut self) -> ContextStore {
        let sampler = self
            .sampler
            .take()
            .unwrap_or_else(|| Arc::new(ProcessSampler::new()));
        let mut context = ContextStore::new(self.config.memory.short_term_capacity)
            .with_sampler(sampler, self.config.cycle.observe_timeout());

        let persistence = self.persistence.take().or_else(|| {
            self.config.persistence.enabled.then(|| {
                let path = self.config.context_path();
                tracing::info!(path = %path.display(), "Context persistence enabled");
                Arc::new(JsonFilePersistence::new(path)) as Arc<dyn ContextPersistence>
            })
        });
        if let Some(persistence) = persistence {
            context = context.with_persistence(persistence);
        }
        context
    }

    /// 组装全部组件并注册内置命令
    pub fn build(mut self) -> Agent {
        let context = Arc::new(self.build_context());
        let registry = Arc::new(
            CommandRegistry::new().with_timeout(self.config.commands.handler_timeout()),
        );

        let tracker = Arc::new(TaskTracker::with_history_capacity(
            Arc::clone(&context),
            self.config.memory.task_history_capacity,
        ));
        for (kind, control) in self.controls.drain(..) {
            tracker.register_control(kind, control);
        }

        let mut scheduler = CycleScheduler::new(Arc::clone(&context), Arc::clone(&registry))
            .with_config(self.config.cycle.scheduler_config());
        if let Some(decider) = self.decider.take() {
            scheduler = scheduler.with_decider(decider);
        }
        if let Some(processor) = self.processor.take() {
            scheduler = scheduler.with_input_processor(processor);
        }
        if let Some(clock) = self.clock.take() {
            scheduler = scheduler.with_clock(clock);
        }
        let scheduler = Arc::new(scheduler);

        let runtime_config = Arc::new(RuntimeConfig::new(&self.config));
        let services = Arc::new(CommandServices {
            context: Arc::clone(&context),
            tracker: Arc::clone(&tracker),
            stats: scheduler.stats(),
            scheduler_state: scheduler.subscribe(),
            registry: Arc::downgrade(&registry),
            config: Arc::clone(&runtime_config),
            started_at: Instant::now(),
        });
        register_builtin(&registry, services);
        tracing::info!(
            commands = registry.command_names().len(),
            "Agent components built"
        );

        Agent::new(
            self.config,
            context,
            registry,
            tracker,
            scheduler,
            runtime_config,
        )
    }
}
