//! 任务生命周期：创建、停止、重启
//!
//! 任务记录保存在 ContextStore 的 activeTasks 中；停止完成后移出并归档到有界历史，
//! 以便之后仍能查询最终状态。底层工作由发起它的命令负责，这里只做簿记与状态流转。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

use crate::context::{ContextStore, JsonMap, Task, TaskId, TaskState};
use crate::core::AgentError;

const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// 按任务类型注册的控制钩子
pub trait TaskControl: Send + Sync {
    /// 启动底层工作；返回 Err 时任务进入 Failed
    fn launch(&self, task: &Task) -> Result<(), AgentError> {
        let _ = task;
        Ok(())
    }

    /// 非强制 stop 时询问任务能否干净停止
    fn can_stop(&self, task: &Task) -> bool {
        let _ = task;
        true
    }

    fn on_stop(&self, task: &Task, forced: bool) {
        let _ = (task, forced);
    }
}

pub struct TaskTracker {
    context: Arc<ContextStore>,
    controls: RwLock<HashMap<String, Arc<dyn TaskControl>>>,
    history: Mutex<VecDeque<Task>>,
    history_capacity: usize,
}

impl TaskTracker {
    pub fn new(context: Arc<ContextStore>) -> Self {
        Self::with_history_capacity(context, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(context: Arc<ContextStore>, history_capacity: usize) -> Self {
        Self {
            context,
            controls: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_capacity,
        }
    }

    pub fn register_control(&self, kind: impl Into<String>, control: Arc<dyn TaskControl>) {
        self.controls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.into(), control);
    }

    fn control(&self, kind: &str) -> Option<Arc<dyn TaskControl>> {
        self.controls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    /// 创建任务（Starting）并立即返回 id
    ///
    /// 有该类型的 TaskControl 时调用 launch：成功进入 Running，失败进入 Failed；
    /// 没有注册控制钩子的类型只做簿记，直接进入 Running。
    pub async fn start(&self, kind: &str, params: JsonMap) -> TaskId {
        let task = Task::new(kind, params);
        let id = task.id.clone();
        self.context.add_task(task.clone()).await;
        tracing::info!(task_id = %id, kind, "Task created");

        let next = match self.control(kind) {
            Some(control) => match control.launch(&task) {
                Ok(()) => TaskState::Running,
                Err(e) => {
                    tracing::warn!(task_id = %id, error = %e, kind = ?e.kind(), "Task launch failed");
                    TaskState::Failed
                }
            },
            None => TaskState::Running,
        };
        self.context.set_task_state(&id, next).await;
        id
    }

    /// 停止任务。非强制且任务报告无法干净停止时保持 Running 并返回 false；未知 id 返回 false
    ///
    /// Failed 任务视为已停止：移出 activeTasks 并返回 true。
    pub async fn stop(&self, id: &str, force: bool) -> bool {
        let Some(task) = self.context.get_task(id).await else {
            tracing::debug!(task_id = %id, "Stop requested for unknown task");
            return false;
        };

        if task.state == TaskState::Failed {
            self.retire(id).await;
            return true;
        }
        if !task.state.is_stoppable() {
            tracing::debug!(task_id = %id, state = task.state.as_str(), "Task is not stoppable");
            return false;
        }

        let control = self.control(&task.kind);
        if !force {
            if let Some(control) = &control {
                if !control.can_stop(&task) {
                    self.context.set_task_state(id, TaskState::Running).await;
                    tracing::info!(task_id = %id, "Task refused a clean stop");
                    return false;
                }
            }
        }

        self.context.set_task_state(id, TaskState::Stopping).await;
        if let Some(control) = &control {
            control.on_stop(&task, force);
        }
        self.context.set_task_state(id, TaskState::Stopped).await;
        self.retire(id).await;
        tracing::info!(task_id = %id, force, "Task stopped");
        true
    }

    /// 强制停止后以相同 kind/params 重新创建，返回新 id；未知 id 返回 None
    pub async fn restart(&self, id: &str) -> Option<TaskId> {
        let task = self.context.get_task(id).await?;
        if !self.stop(id, true).await {
            return None;
        }
        let new_id = self.start(&task.kind, task.params).await;
        tracing::info!(old = %id, new = %new_id, "Task restarted");
        Some(new_id)
    }

    /// 标记任务失败（后台工作通过这里回写上下文）
    pub async fn mark_failed(&self, id: &str) -> bool {
        self.context.set_task_state(id, TaskState::Failed).await.is_some()
    }

    /// 活跃任务或历史中的任务
    pub async fn get(&self, id: &str) -> Option<Task> {
        if let Some(task) = self.context.get_task(id).await {
            return Some(task);
        }
        self.history.lock().await.iter().rev().find(|t| t.id == id).cloned()
    }

    pub async fn state(&self, id: &str) -> Option<TaskState> {
        self.get(id).await.map(|t| t.state)
    }

    pub async fn list(&self) -> Vec<Task> {
        self.context.list_tasks().await
    }

    pub async fn history(&self) -> Vec<Task> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// 强制停止全部活跃任务（关闭时使用），返回停止数量
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for task in self.context.list_tasks().await {
            if self.stop(&task.id, true).await {
                stopped += 1;
            }
        }
        stopped
    }

    async fn retire(&self, id: &str) {
        if let Some(task) = self.context.remove_task(id).await {
            let mut history = self.history.lock().await;
            history.push_back(task);
            while history.len() > self.history_capacity {
                history.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Stubborn {
        stops: AtomicUsize,
        forced: AtomicBool,
    }

    impl TaskControl for Stubborn {
        fn can_stop(&self, _task: &Task) -> bool {
            false
        }

        fn on_stop(&self, _task: &Task, forced: bool) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.forced.store(forced, Ordering::SeqCst);
        }
    }

    struct FailsToLaunch;

    impl TaskControl for FailsToLaunch {
        fn launch(&self, _task: &Task) -> Result<(), AgentError> {
            Err(AgentError::fault("no such binary"))
        }
    }

    fn tracker() -> TaskTracker {
        TaskTracker::new(Arc::new(ContextStore::default()))
    }

    #[tokio::test]
    async fn test_start_returns_unique_ids() {
        let tracker = tracker();
        let a = tracker.start("scan", JsonMap::new()).await;
        let b = tracker.start("scan", JsonMap::new()).await;
        assert_ne!(a, b);
        assert_eq!(tracker.list().await.len(), 2);
        assert_eq!(tracker.state(&a).await, Some(TaskState::Running));
    }

    #[tokio::test]
    async fn test_stop_refused_then_forced() {
        let tracker = tracker();
        let control = Arc::new(Stubborn {
            stops: AtomicUsize::new(0),
            forced: AtomicBool::new(false),
        });
        tracker.register_control("watch", control.clone());
        let id = tracker.start("watch", JsonMap::new()).await;

        assert!(!tracker.stop(&id, false).await);
        assert_eq!(tracker.state(&id).await, Some(TaskState::Running));
        assert_eq!(control.stops.load(Ordering::SeqCst), 0);

        assert!(tracker.stop(&id, true).await);
        assert_eq!(tracker.state(&id).await, Some(TaskState::Stopped));
        assert!(control.forced.load(Ordering::SeqCst));
        assert!(tracker.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_is_false() {
        assert!(!tracker().stop("task_nope", true).await);
    }

    #[tokio::test]
    async fn test_stop_twice() {
        let tracker = tracker();
        let id = tracker.start("scan", JsonMap::new()).await;
        assert!(tracker.stop(&id, false).await);
        assert!(!tracker.stop(&id, false).await);
    }

    #[tokio::test]
    async fn test_restart_issues_new_id() {
        let tracker = tracker();
        let mut params = JsonMap::new();
        params.insert("target".into(), serde_json::json!("10.0.0.0/24"));
        let id = tracker.start("scan", params.clone()).await;
        let new_id = tracker.restart(&id).await.unwrap();
        assert_ne!(id, new_id);
        let tasks = tracker.list().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, new_id);
        assert_eq!(tasks[0].params, params);
        assert_eq!(tracker.state(&id).await, Some(TaskState::Stopped));
    }

    #[tokio::test]
    async fn test_restart_unknown_is_none() {
        assert!(tracker().restart("task_nope").await.is_none());
    }

    #[tokio::test]
    async fn test_launch_failure_marks_failed_and_stop_retires() {
        let tracker = tracker();
        tracker.register_control("broken", Arc::new(FailsToLaunch));
        let id = tracker.start("broken", JsonMap::new()).await;
        assert_eq!(tracker.state(&id).await, Some(TaskState::Failed));
        assert!(tracker.stop(&id, false).await);
        assert!(tracker.list().await.is_empty());
        assert_eq!(tracker.state(&id).await, Some(TaskState::Failed));
    }

    #[tokio::test]
    async fn test_background_failure_then_stop_retires() {
        let tracker = tracker();
        let id = tracker.start("scan", JsonMap::new()).await;
        assert!(tracker.mark_failed(&id).await);
        assert_eq!(tracker.state(&id).await, Some(TaskState::Failed));
        assert_eq!(tracker.list().await[0].state, TaskState::Failed);

        assert!(tracker.stop(&id, false).await);
        assert!(tracker.list().await.is_empty());
        assert_eq!(tracker.history().await.len(), 1);
        assert_eq!(tracker.state(&id).await, Some(TaskState::Failed));
        assert!(!tracker.mark_failed(&id).await);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let tracker = TaskTracker::with_history_capacity(Arc::new(ContextStore::default()), 2);
        for _ in 0..4 {
            let id = tracker.start("scan", JsonMap::new()).await;
            tracker.stop(&id, true).await;
        }
        assert_eq!(tracker.history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_all() {
        let tracker = tracker();
        tracker.start("a", JsonMap::new()).await;
        tracker.start("b", JsonMap::new()).await;
        assert_eq!(tracker.stop_all().await, 2);
        assert!(tracker.list().await.is_empty());
    }
}
