//! 上下文存储：进程级唯一的可变状态
//!
//! 调度器、命令注册表与宿主协作者都持有同一个 `Arc<ContextStore>`，只通过这里的访问器读写。
//! pendingInputs 使用独立的锁，生产者入队不会与主循环的 Observe 步互相阻塞。

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use crate::context::{
    ContextPersistence, EnvironmentSampler, InputRecord, JsonMap, MemoryEntry, ShortTermMemory,
    Task, TaskState, DEFAULT_SHORT_TERM_CAPACITY,
};
use crate::core::{panic_message, AgentError, AgentPhase};

const DEFAULT_SAMPLE_TIMEOUT: Duration = Duration::from_secs(2);

/// 完整上下文的可序列化形式，也是传给决策函数的快照
///
/// 字段别名兼容旧版快照（system_state / environment_data）。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSnapshot {
    #[serde(alias = "system_state")]
    pub phase: AgentPhase,
    pub last_update: Option<DateTime<Utc>>,
    pub active_tasks: Vec<Task>,
    pub pending_inputs: Vec<InputRecord>,
    pub short_term_memory: Vec<MemoryEntry>,
    #[serde(alias = "environment_data")]
    pub environment: JsonMap,
}

impl ContextSnapshot {
    /// 将磁盘上的快照逐字段合并进默认值：缺失或无法解析的字段保留默认，未知字段忽略
    pub fn merge_from(blob: Value) -> Result<Self, AgentError> {
        let Value::Object(mut fields) = blob else {
            return Err(AgentError::Persistence(
                "context snapshot is not a JSON object".into(),
            ));
        };
        let mut merged = Self::default();

        if let Some(v) = take_field(&mut fields, &["phase", "system_state"]) {
            merge_field(&mut merged.phase, v, "phase");
        }
        if let Some(v) = take_field(&mut fields, &["last_update"]) {
            merge_field(&mut merged.last_update, v, "last_update");
        }
        if let Some(v) = take_field(&mut fields, &["active_tasks"]) {
            merge_field(&mut merged.active_tasks, v, "active_tasks");
        }
        if let Some(v) = take_field(&mut fields, &["pending_inputs"]) {
            merge_field(&mut merged.pending_inputs, v, "pending_inputs");
        }
        if let Some(v) = take_field(&mut fields, &["short_term_memory"]) {
            merge_field(&mut merged.short_term_memory, v, "short_term_memory");
        }
        if let Some(v) = take_field(&mut fields, &["environment", "environment_data"]) {
            merge_field(&mut merged.environment, v, "environment");
        }
        Ok(merged)
    }
}

fn take_field(fields: &mut JsonMap, names: &[&str]) -> Option<Value> {
    names.iter().find_map(|name| fields.remove(*name))
}

fn merge_field<T: serde::de::DeserializeOwned>(slot: &mut T, value: Value, name: &str) {
    match serde_json::from_value(value) {
        Ok(v) => *slot = v,
        Err(e) => tracing::warn!(field = name, error = %e, "Ignoring malformed snapshot field"),
    }
}

/// 锁内状态（pendingInputs 除外）
#[derive(Debug, Default)]
struct ContextState {
    phase: AgentPhase,
    last_update: Option<DateTime<Utc>>,
    active_tasks: Vec<Task>,
    memory: ShortTermMemory,
    environment: JsonMap,
}

pub struct ContextStore {
    state: RwLock<ContextState>,
    pending: Mutex<VecDeque<InputRecord>>,
    sampler: Option<Arc<dyn EnvironmentSampler>>,
    sample_timeout: Duration,
    persistence: Option<Arc<dyn ContextPersistence>>,
    memory_capacity: usize,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_SHORT_TERM_CAPACITY)
    }
}

impl ContextStore {
    pub fn new(memory_capacity: usize) -> Self {
        let memory_capacity = memory_capacity.clamp(1, DEFAULT_SHORT_TERM_CAPACITY);
        Self {
            state: RwLock::new(ContextState {
                memory: ShortTermMemory::new(memory_capacity),
                ..ContextState::default()
            }),
            pending: Mutex::new(VecDeque::new()),
            sampler: None,
            sample_timeout: DEFAULT_SAMPLE_TIMEOUT,
            persistence: None,
            memory_capacity,
        }
    }

    /// 设置环境采样器及单次采样超时
    pub fn with_sampler(mut self, sampler: Arc<dyn EnvironmentSampler>, sample_timeout: Duration) -> Self {
        self.sampler = Some(sampler);
        self.sample_timeout = sample_timeout;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn ContextPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Observe 步：刷新 environment、更新 lastUpdate、裁剪短期记忆
    ///
    /// 采样失败、panic 或超时只记日志，environment 保持原值。
    pub async fn update(&self) {
        let sampled = match &self.sampler {
            Some(sampler) => self.sample(sampler.as_ref()).await,
            None => None,
        };
        let mut state = self.state.write().await;
        if let Some(env) = sampled {
            state.environment = env;
        }
        state.last_update = Some(Utc::now());
        let evicted = state.memory.prune();
        if evicted > 0 {
            tracing::debug!(evicted, "Pruned short-term memory");
        }
    }

    async fn sample(&self, sampler: &dyn EnvironmentSampler) -> Option<JsonMap> {
        let timeout_ms = self.sample_timeout.as_millis() as u64;
        match timeout(self.sample_timeout, AssertUnwindSafe(sampler.sample()).catch_unwind()).await {
            Ok(Ok(Ok(env))) => Some(env),
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, kind = ?e.kind(), "Environment sampling failed");
                None
            }
            Ok(Err(panic)) => {
                let err = AgentError::fault(panic_message(panic.as_ref()));
                tracing::warn!(error = %err, kind = ?err.kind(), "Environment sampler panicked");
                None
            }
            Err(_) => {
                let err = AgentError::timeout("environment sampling", timeout_ms);
                tracing::warn!(error = %err, kind = ?err.kind(), "Environment sampling timed out");
                None
            }
        }
    }

    /// 原子地取出全部待处理输入；队列为空时返回空 Vec
    pub async fn drain_pending_inputs(&self) -> Vec<InputRecord> {
        let mut pending = self.pending.lock().await;
        std::mem::take(&mut *pending).into()
    }

    /// 任意生产者入队一条输入，可与主循环并发
    pub async fn enqueue_input(&self, record: InputRecord) {
        self.pending.lock().await.push_back(record);
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn append_memory(&self, payload: Value) {
        let evicted = self.state.write().await.memory.push(payload);
        if evicted > 0 {
            tracing::trace!(evicted, "Short-term memory at capacity, evicted oldest");
        }
    }

    pub async fn memory_len(&self) -> usize {
        self.state.read().await.memory.len()
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory_capacity
    }

    pub async fn recent_memory(&self, n: usize) -> Vec<MemoryEntry> {
        self.state.read().await.memory.recent(n)
    }

    pub async fn add_task(&self, task: Task) {
        self.state.write().await.active_tasks.push(task);
    }

    /// 未知 id 不是错误：任务可能已被清理
    pub async fn remove_task(&self, id: &str) -> Option<Task> {
        let mut state = self.state.write().await;
        let pos = state.active_tasks.iter().position(|t| t.id == id)?;
        Some(state.active_tasks.remove(pos))
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.state.read().await.active_tasks.clone()
    }

    pub async fn get_task(&self, id: &str) -> Option<Task> {
        self.state
            .read()
            .await
            .active_tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    /// 更新任务状态，返回旧状态；未知 id 返回 None
    pub async fn set_task_state(&self, id: &str, new_state: TaskState) -> Option<TaskState> {
        let mut state = self.state.write().await;
        let task = state.active_tasks.iter_mut().find(|t| t.id == id)?;
        let previous = task.state;
        task.set_state(new_state);
        Some(previous)
    }

    pub async fn phase(&self) -> AgentPhase {
        self.state.read().await.phase
    }

    pub async fn set_phase(&self, phase: AgentPhase) {
        let mut state = self.state.write().await;
        if state.phase != phase {
            tracing::info!(from = ?state.phase, to = ?phase, "Agent phase changed");
            state.phase = phase;
        }
    }

    pub async fn environment(&self) -> JsonMap {
        self.state.read().await.environment.clone()
    }

    /// 供推送式宿主采样使用：将观测值合并进 environment
    pub async fn merge_environment(&self, values: JsonMap) {
        self.state.write().await.environment.extend(values);
    }

    pub async fn last_update(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_update
    }

    pub async fn snapshot(&self) -> ContextSnapshot {
        let pending_inputs: Vec<InputRecord> = self.pending.lock().await.iter().cloned().collect();
        let state = self.state.read().await;
        ContextSnapshot {
            phase: state.phase,
            last_update: state.last_update,
            active_tasks: state.active_tasks.clone(),
            pending_inputs,
            short_term_memory: state.memory.to_vec(),
            environment: state.environment.clone(),
        }
    }

    /// 序列化完整上下文写入持久化层；未配置持久化层时为空操作
    pub async fn persist(&self) -> Result<(), AgentError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let blob = serde_json::to_value(self.snapshot().await)?;
        persistence.save(&blob).await?;
        tracing::debug!("Context persisted");
        Ok(())
    }

    /// 从持久化层加载并合并进默认值；返回是否加载了快照
    ///
    /// 出错时上下文保持不变（默认值），由调用方记录日志后继续启动。
    pub async fn restore(&self) -> Result<bool, AgentError> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        let Some(blob) = persistence.load().await? else {
            return Ok(false);
        };
        let snapshot = ContextSnapshot::merge_from(blob)?;
        {
            let mut state = self.state.write().await;
            state.phase = snapshot.phase;
            state.last_update = snapshot.last_update;
            state.active_tasks = snapshot.active_tasks;
            state.memory = ShortTermMemory::from_entries(snapshot.short_term_memory, self.memory_capacity);
            state.environment = snapshot.environment;
        }
        let mut pending = self.pending.lock().await;
        // 恢复的输入排在进程启动后已入队的输入之前
        let restored: VecDeque<InputRecord> = snapshot.pending_inputs.into();
        let fresh = std::mem::replace(&mut *pending, restored);
        pending.extend(fresh);
        tracing::info!("Context restored from persistence");
        Ok(true)
    }
}
