//! 核心层：错误与恢复、状态投影、认知周期调度、任务生命周期、优雅关闭

pub mod builder;
pub mod clock;
pub mod decision;
pub mod error;
pub mod ingest;
pub mod recovery;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod task_tracker;

pub use builder::AgentBuilder;
pub use clock::{Clock, TokioClock};
pub use decision::{Action, Decider, NeverAct};
pub use error::{panic_message, AgentError, ErrorKind, RecoveryAction};
pub use ingest::{InputProcessor, MemoryInputProcessor};
pub use recovery::RecoveryEngine;
pub use scheduler::{CycleScheduler, CycleStats, SchedulerConfig};
pub use shutdown::{ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::{AgentPhase, SchedulerState, StatusReport};
pub use task_tracker::{TaskControl, TaskTracker};
