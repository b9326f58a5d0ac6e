//! 共享上下文：阶段、活跃任务、待处理输入、短期记忆、环境观测，以及持久化与采样接口

pub mod memory;
pub mod persistence;
pub mod sampler;
pub mod store;
pub mod task;

pub use memory::{MemoryEntry, ShortTermMemory, DEFAULT_SHORT_TERM_CAPACITY};
pub use persistence::{ContextPersistence, JsonFilePersistence, MemoryPersistence};
pub use sampler::{EnvironmentSampler, ProcessSampler};
pub use store::{ContextSnapshot, ContextStore};
pub use task::{Task, TaskId, TaskState};

/// 字符串键到任意 JSON 值的映射
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// 外部输入记录，对核心不透明
pub type InputRecord = JsonMap;
