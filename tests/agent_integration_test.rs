//! Agent 集成测试：命令分发、任务生命周期、上下文恢复、主循环节拍

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use vader::config::AppConfig;
    use vader::context::{
        ContextSnapshot, JsonFilePersistence, MemoryPersistence, Task, TaskState,
    };
    use vader::core::{Action, AgentPhase, ErrorKind, SchedulerState, TaskControl};
    use vader::commands::{FnHandler, Params};
    use vader::Agent;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.persistence.enabled = false;
        config
    }

    fn params(v: Value) -> Params {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_echo_round_trip_through_agent() {
        let agent = Agent::builder(config()).build();
        let result = agent.execute("echo", params(json!({"a": 1, "b": [true]}))).await;
        let body = serde_json::to_value(&result).unwrap();
        assert_eq!(body, json!({"status": "success", "payload": {"a": 1, "b": [true]}}));
    }

    #[tokio::test]
    async fn test_unknown_command_body() {
        let agent = Agent::builder(config()).build();
        let result = agent.execute("teleport", Params::new()).await;
        assert_eq!(result.kind, Some(ErrorKind::UnknownCommand));
        let body = serde_json::to_value(&result).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "unknown_command");
        assert!(body["message"].as_str().unwrap().contains("teleport"));
    }

    #[tokio::test]
    async fn test_custom_skill_panic_becomes_error_result() {
        let agent = Agent::builder(config()).build();
        agent.register_command(
            "explode",
            FnHandler::new("always panics", |_p: Params| panic!("kaboom")),
        );
        let result = agent.execute("explode", Params::new()).await;
        assert!(result.is_error());
        assert_eq!(result.kind, Some(ErrorKind::HandlerFault));
        assert!(result.message().unwrap().contains("kaboom"));
        // 故障之后注册表仍可用
        assert!(agent.execute("echo", Params::new()).await.is_success());
    }

    /// 前 N 次非强制停止请求被拒绝
    struct Busy {
        refusals: AtomicUsize,
    }

    impl TaskControl for Busy {
        fn can_stop(&self, _task: &Task) -> bool {
            self.refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }
    }

    #[tokio::test]
    async fn test_stop_scenarios_via_commands() {
        let agent = Agent::builder(config())
            .with_task_control(
                "render",
                Arc::new(Busy {
                    refusals: AtomicUsize::new(1),
                }),
            )
            .build();
        let started = agent
            .execute("start", params(json!({"type": "render"})))
            .await;
        let id = started.payload["task_id"].as_str().unwrap().to_string();

        let refused = agent
            .execute("stop", params(json!({"task_id": id, "force": false})))
            .await;
        assert_eq!(refused.payload["stopped"], false);
        assert_eq!(agent.tracker().state(&id).await, Some(TaskState::Running));

        let clean = agent
            .execute("stop", params(json!({"task_id": id})))
            .await;
        assert_eq!(clean.payload["stopped"], true);
        assert_eq!(agent.tracker().state(&id).await, Some(TaskState::Stopped));
        assert!(agent.context().list_tasks().await.is_empty());

        let unknown = agent
            .execute("stop", params(json!({"task_id": "task_unknown", "force": true})))
            .await;
        assert!(unknown.is_success());
        assert_eq!(unknown.payload["stopped"], false);
    }

    #[tokio::test]
    async fn test_restore_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("context.json");
        std::fs::write(
            &path,
            json!({
                "phase": "ready",
                "short_term_memory": [
                    {"timestamp": "2024-01-01T00:00:00Z", "data": {"note": "old"}}
                ],
                "pending_inputs": [{"text": "left over"}],
                "unexpected": 42
            })
            .to_string(),
        )
        .unwrap();

        let agent = Agent::builder(config())
            .with_persistence(Arc::new(JsonFilePersistence::new(&path)))
            .build();
        assert!(agent.restore().await.unwrap());

        let snapshot = agent.context().snapshot().await;
        assert_eq!(snapshot.phase, AgentPhase::Ready);
        assert!(snapshot.active_tasks.is_empty());
        assert!(snapshot.environment.is_empty());
        assert_eq!(snapshot.short_term_memory.len(), 1);
        assert_eq!(snapshot.short_term_memory[0].data["note"], "old");
        assert_eq!(agent.context().pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_restore_from_missing_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::builder(config())
            .with_persistence(Arc::new(JsonFilePersistence::new(dir.path().join("none.json"))))
            .build();
        assert!(!agent.restore().await.unwrap());
        assert_eq!(agent.context().snapshot().await, ContextSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_loop_end_to_end() {
        let persistence = Arc::new(MemoryPersistence::new());
        let decider = |ctx: &ContextSnapshot| {
            ctx.active_tasks
                .is_empty()
                .then(|| Action::new("start", params(json!({"type": "heartbeat"}))))
        };
        let agent = Arc::new(
            Agent::builder(config())
                .with_persistence(persistence.clone())
                .with_decider(Arc::new(decider))
                .build(),
        );
        agent
            .enqueue_input(params(json!({"command": "surge", "params": {"duration": 5}})))
            .await;

        let runner = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.run().await })
        };
        tokio::time::sleep(Duration::from_millis(350)).await;
        agent.stop();
        runner.await.unwrap().unwrap();

        let status = agent.status().await;
        assert!((3..=4).contains(&status.cycle_count), "cycle_count = {}", status.cycle_count);
        assert_eq!(status.error_count, 0);
        assert_eq!(status.scheduler, SchedulerState::Stopped);
        assert_eq!(status.phase, AgentPhase::Stopped);

        // decider 只在没有活跃任务时启动一次
        assert_eq!(agent.tracker().list().await.len(), 1);

        let memory = agent.context().recent_memory(10).await;
        assert!(memory
            .iter()
            .any(|m| m.data["result"]["payload"]["surge_applied"]["duration"] == 5));

        let blob = persistence.blob().await.unwrap();
        assert_eq!(blob["phase"], "stopped");
        assert_eq!(blob["active_tasks"].as_array().unwrap().len(), 1);
    }
}
