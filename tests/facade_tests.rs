//! Integration tests for the per-invocation facades and the task runtime.
//!
//! Simulates a hook process: one runtime, several invocations built from
//! hook events, work started in one invocation and collected in a later one.

use std::sync::Arc;
use std::time::Duration;

use hook_tasks::constants::DEFAULT_SESSION_ID;
use hook_tasks::{
    resolve_session_id, Backend, BackendConfig, BackendKind, BackgroundTasks, ImmediateBackend,
    PendingResults, Task, TaskArgs, TaskRuntime, TaskStatus,
};
use rstest::rstest;
use serde_json::{json, Value};

fn lookup() -> Task {
    Task::new("lookup", |args: TaskArgs| async move {
        let topic: String = args.get(0)?;
        let limit: u64 = args.named_opt("limit")?.unwrap_or(3);
        tokio::time::sleep(Duration::from_millis(10)).await;
        anyhow::Ok(json!({ "topic": topic, "limit": limit }))
    })
}

// ─── Session Resolution ─────────────────────────────────────────────────────

#[rstest]
#[case(json!({ "session_id": "abc-123" }), "abc-123")]
#[case(json!({ "session_id": "" }), DEFAULT_SESSION_ID)]
#[case(json!({ "session_id": 42 }), DEFAULT_SESSION_ID)]
#[case(json!({ "session_id": null }), DEFAULT_SESSION_ID)]
#[case(json!({ "hook_event_name": "Stop" }), DEFAULT_SESSION_ID)]
#[case(json!([]), DEFAULT_SESSION_ID)]
fn session_id_resolution(#[case] event: Value, #[case] expected: &str) {
    assert_eq!(resolve_session_id(&event), expected);
}

// ─── Cross-Invocation Flow ──────────────────────────────────────────────────

mod runtime_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest]
    #[case(BackendKind::Immediate)]
    #[case(BackendKind::WorkerPool)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_result_crosses_invocations(#[case] kind: BackendKind) {
        let runtime = TaskRuntime::from_config(&BackendConfig::default().with_kind(kind));
        let event = json!({ "session_id": "sess-1", "hook_event_name": "PostToolUse" });

        let first = runtime.invocation_for_event(&event);
        first
            .tasks
            .add(
                &lookup(),
                TaskArgs::from([json!("borrowck")]).kwarg("limit", json!(5)),
                "context",
            )
            .await
            .unwrap();

        let second = runtime.invocation_for_event(&event);
        let value = second
            .pending
            .wait("context", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(value, json!({ "topic": "borrowck", "limit": 5 }));
        assert!(!second.pending.has(Some("context")).await);

        runtime.shutdown(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_other_session_sees_nothing() {
        let runtime = TaskRuntime::new(Arc::new(ImmediateBackend::new()));
        let mine = runtime.invocation("mine");
        let theirs = runtime.invocation("theirs");

        mine.tasks
            .add(&lookup(), TaskArgs::from([json!("x")]), "k")
            .await
            .unwrap();

        assert!(!theirs.pending.has(None).await);
        assert_eq!(theirs.pending.pop("k").await, None);
        assert!(theirs.pending.pop_all().await.is_empty());
        assert!(mine.pending.has(None).await);
    }

    #[tokio::test]
    async fn test_missing_session_shares_default_bucket() {
        let runtime = TaskRuntime::new(Arc::new(ImmediateBackend::new()));
        let first = runtime.invocation_for_event(&json!({}));
        first
            .tasks
            .add(&lookup(), TaskArgs::from([json!("y")]), "k")
            .await
            .unwrap();

        let second = runtime.invocation(DEFAULT_SESSION_ID);
        assert!(second.pending.has(Some("k")).await);
    }

    #[tokio::test]
    async fn test_shutdown_through_runtime() {
        let runtime = TaskRuntime::from_config(
            &BackendConfig::default().with_kind(BackendKind::Immediate),
        );
        runtime.shutdown(true).await.unwrap();

        let invocation = runtime.invocation("s");
        let err = invocation
            .tasks
            .add(&lookup(), TaskArgs::from([json!("z")]), "k")
            .await
            .unwrap_err();
        assert!(!err.is_task_failure());
        assert!(runtime.shutdown(true).await.unwrap_err().is_misuse());
    }
}

// ─── Facades ────────────────────────────────────────────────────────────────

mod facade_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_pending_get_and_pop_errors() {
        let backend: Arc<dyn Backend> = Arc::new(ImmediateBackend::new());
        let tasks = BackgroundTasks::new(Arc::clone(&backend), "s");
        let pending = PendingResults::new(Arc::clone(&backend), "s");

        let broken = Task::from_fn("broken", |_| Err(anyhow::anyhow!("index missing")));
        tasks.add(&broken, TaskArgs::new(), "bad").await.unwrap();

        let snapshot = pending.get("bad").await.unwrap();
        assert_eq!(snapshot.status(), TaskStatus::Failed);
        assert_eq!(snapshot.task_name(), "broken");

        assert_eq!(pending.pop("bad").await, None);
        let errors = pending.pop_errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "bad");
        assert_eq!(errors[0].1.to_string(), "index missing");
        assert!(pending.get("bad").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_cancel() {
        let runtime = TaskRuntime::from_config(&BackendConfig::default().with_max_workers(1));
        let invocation = runtime.invocation("s");
        let slow = Task::new("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            anyhow::Ok(Value::Null)
        });

        invocation.tasks.add(&slow, TaskArgs::new(), "k").await.unwrap();
        assert!(invocation.tasks.cancel("k").await);
        assert!(!invocation.tasks.cancel("k").await);
        assert_eq!(
            invocation.pending.get("k").await.unwrap().status(),
            TaskStatus::Cancelled
        );
        runtime.shutdown(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_all_and_wait_any_through_facade() {
        let runtime = TaskRuntime::new(Arc::new(ImmediateBackend::new()));
        let invocation = runtime.invocation("s");
        for topic in ["a", "b", "c"] {
            invocation
                .tasks
                .add(&lookup(), TaskArgs::from([json!(topic)]), topic)
                .await
                .unwrap();
        }

        let (key, _) = invocation
            .pending
            .wait_any(&["c", "a"], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(key, "c");

        let values = invocation
            .pending
            .wait_all(&["a", "b"], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(values["a"]["topic"], json!("a"));
        assert_eq!(values["b"]["topic"], json!("b"));
        assert!(!invocation.pending.has(None).await);
    }
}
