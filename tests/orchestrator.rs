//! Orchestrator Integration Tests
//!
//! Level barriers, the concurrency cap, failure skipping, and the
//! single-run guard, driven through the public surface.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;

use marshal::config::{OrchestratorSettings, PoolSettings};
use marshal::core::graph::WatchTable;
use marshal::core::SystemClock;
use marshal::domain::{AgentOverrides, OutcomeStatus};
use marshal::invoke::{invocable, Invocable};
use marshal::{AgentPool, DependencyGraph, Orchestrator, OrchestratorError};

fn orchestrator(watch: WatchTable, settings: OrchestratorSettings) -> Arc<Orchestrator> {
    let pool = Arc::new(AgentPool::new(
        PoolSettings::default(),
        Arc::new(SystemClock),
    ));
    Arc::new(Orchestrator::new(
        DependencyGraph::with_watch_table(watch),
        pool,
        settings,
    ))
}

fn tracing_op(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Arc<dyn Invocable> {
    let log = log.clone();
    let name = name.to_string();
    invocable(move || {
        let log = log.clone();
        let name = name.clone();
        async move {
            log.lock().unwrap().push(name);
            Ok(json!(null))
        }
    })
}

#[tokio::test]
async fn test_levels_run_in_order_with_hard_barrier() {
    let orch = orchestrator(WatchTable::new(), OrchestratorSettings::default());
    let log = Arc::new(Mutex::new(Vec::new()));

    orch.register(
        "document-agent",
        &[] as &[&str],
        AgentOverrides::default(),
        tracing_op(&log, "document-agent"),
    );
    orch.register(
        "schema-agent",
        &[] as &[&str],
        AgentOverrides::default(),
        tracing_op(&log, "schema-agent"),
    );
    orch.register(
        "backend-agent",
        &["document-agent", "schema-agent"],
        AgentOverrides::default(),
        tracing_op(&log, "backend-agent"),
    );

    let report = orch.execute(&[] as &[&str]).await.unwrap();
    assert!(report.success);
    assert_eq!(report.agents_executed, 3);
    assert_eq!(report.agents_failed, 0);

    let order = log.lock().unwrap().clone();
    let backend_pos = order.iter().position(|n| n == "backend-agent").unwrap();
    assert_eq!(backend_pos, 2, "backend-agent must run after both roots");
}

#[tokio::test]
async fn test_concurrency_cap_batches_same_level_agents() {
    let orch = orchestrator(
        WatchTable::new(),
        OrchestratorSettings { max_concurrency: 2 },
    );

    for i in 0..5 {
        orch.register(
            &format!("agent-{i}"),
            &[] as &[&str],
            AgentOverrides::default(),
            invocable(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!(null))
            }),
        );
    }

    let started = Instant::now();
    let report = orch.execute(&[] as &[&str]).await.unwrap();
    let elapsed = started.elapsed();

    assert!(report.success);
    assert_eq!(report.agents_executed, 5);
    // Five 100ms agents through two slots: three batches, not one.
    assert!(
        elapsed >= Duration::from_millis(300),
        "cap not enforced: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(500),
        "agents did not overlap: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_failed_dependency_skips_dependents_but_not_siblings() {
    let orch = orchestrator(WatchTable::new(), OrchestratorSettings::default());

    orch.register(
        "document-agent",
        &[] as &[&str],
        AgentOverrides {
            max_retries: Some(0),
            ..Default::default()
        },
        invocable(|| async { anyhow::bail!("parse error") }),
    );
    orch.register(
        "schema-agent",
        &[] as &[&str],
        AgentOverrides::default(),
        invocable(|| async { Ok(json!(null)) }),
    );
    orch.register(
        "backend-agent",
        &["document-agent"],
        AgentOverrides::default(),
        invocable(|| async { Ok(json!(null)) }),
    );
    orch.register(
        "report-agent",
        &["backend-agent"],
        AgentOverrides::default(),
        invocable(|| async { Ok(json!(null)) }),
    );
    orch.register(
        "schema-sink-agent",
        &["schema-agent"],
        AgentOverrides::default(),
        invocable(|| async { Ok(json!(null)) }),
    );

    let report = orch.execute(&[] as &[&str]).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.agents_failed, 1);

    let status = |name: &str| report.outcome(name).unwrap().status;
    assert_eq!(status("document-agent"), OutcomeStatus::Failed);
    // Same-level independent still ran.
    assert_eq!(status("schema-agent"), OutcomeStatus::Succeeded);
    // Dependent of the failure is skipped, transitively.
    assert_eq!(status("backend-agent"), OutcomeStatus::Skipped);
    assert_eq!(status("report-agent"), OutcomeStatus::Skipped);
    // Dependent of the healthy sibling is unaffected.
    assert_eq!(status("schema-sink-agent"), OutcomeStatus::Succeeded);

    // Skipped agents were never invoked, so their counters are zero.
    let stats = orch.pool().agent_stats("backend-agent").unwrap();
    assert_eq!(stats.total_executions, 0);
}

#[tokio::test]
async fn test_second_execute_rejected_while_first_in_flight() {
    let orch = orchestrator(WatchTable::new(), OrchestratorSettings::default());
    orch.register(
        "slow-agent",
        &[] as &[&str],
        AgentOverrides::default(),
        invocable(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!(null))
        }),
    );

    let first = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.execute(&[] as &[&str]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = orch.status();
    assert!(status.is_executing);
    assert_eq!(status.currently_running, vec!["slow-agent"]);

    let err = orch.execute(&[] as &[&str]).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyInProgress));
    assert_eq!(
        err.to_string(),
        "Orchestration already in progress"
    );

    let report = first.await.unwrap().unwrap();
    assert!(report.success);

    // Guard cleared after the run; a new execute goes through.
    assert!(!orch.status().is_executing);
    let again = orch.execute(&[] as &[&str]).await.unwrap();
    assert!(again.success);
}

#[tokio::test]
async fn test_changed_inputs_run_only_affected_agents() {
    let mut watch = WatchTable::new();
    watch.insert("document-agent".into(), vec!["docs/**/*.md".into()]);
    watch.insert("schema-agent".into(), vec!["api/**/*.yaml".into()]);

    let orch = orchestrator(watch, OrchestratorSettings::default());
    let calls = Arc::new(AtomicU32::new(0));
    let counting = {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            invocable(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(null))
                }
            })
        }
    };

    orch.register(
        "document-agent",
        &[] as &[&str],
        AgentOverrides::default(),
        counting(),
    );
    orch.register(
        "schema-agent",
        &[] as &[&str],
        AgentOverrides::default(),
        counting(),
    );
    orch.register(
        "backend-agent",
        &["document-agent"],
        AgentOverrides::default(),
        counting(),
    );

    let report = orch.execute(&["docs/guide.md"]).await.unwrap();
    assert!(report.success);
    assert_eq!(report.agents_executed, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // schema-agent was out of the plan entirely.
    assert!(report.outcome("schema-agent").is_none());
    let stats = orch.pool().agent_stats("schema-agent").unwrap();
    assert_eq!(stats.total_executions, 0);
}

#[tokio::test]
async fn test_cycle_fails_the_run_but_guard_is_released() {
    let orch = orchestrator(WatchTable::new(), OrchestratorSettings::default());
    orch.register(
        "a",
        &["b"],
        AgentOverrides::default(),
        invocable(|| async { Ok(json!(null)) }),
    );
    orch.register(
        "b",
        &["a"],
        AgentOverrides::default(),
        invocable(|| async { Ok(json!(null)) }),
    );

    let err = orch.execute(&[] as &[&str]).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Graph(_)));
    assert!(!orch.status().is_executing);

    // Correct the edge and the orchestrator recovers.
    orch.register(
        "b",
        &[] as &[&str],
        AgentOverrides::default(),
        invocable(|| async { Ok(json!(null)) }),
    );
    let report = orch.execute(&[] as &[&str]).await.unwrap();
    assert!(report.success);
}
