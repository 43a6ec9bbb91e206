use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use weft_core::config::EngineConfig;
use weft_core::error::WeftError;
use weft_core::execution::{ExecutionStatus, HistoryStatus, WaitingFor, WorkflowExecution};
use weft_core::types::{AgentOutcome, ExecutionEvent, ToolContext};
use weft_core::workflow::{Edge, Node, NodeKind, Workflow};
use weft_engine::{ExecutionHandle, WorkflowEngine};
use weft_test_utils::*;
use weft_tools::ToolRegistry;

fn config(poll_interval_ms: u64) -> EngineConfig {
    EngineConfig {
        poll_interval_ms,
        ..EngineConfig::default()
    }
}

fn engine_with_inbox(inbox: &Arc<MockInbox>, poll_interval_ms: u64) -> WorkflowEngine {
    WorkflowEngine::builder()
        .with_config(config(poll_interval_ms))
        .with_inbox(inbox.clone())
        .build()
}

fn tools_with_failure() -> ToolRegistry {
    let mut tools = ToolRegistry::with_builtins();
    tools.register_fn("explode", |_p: Value, _c: ToolContext| async move {
        Err::<Value, _>(WeftError::ToolExecution {
            tool: "explode".into(),
            message: "boom".into(),
        })
    });
    tools
}

fn statuses(exec: &WorkflowExecution) -> Vec<(&str, HistoryStatus)> {
    exec.history
        .iter()
        .map(|e| (e.node_id.as_str(), e.status))
        .collect()
}

fn ran(exec: &WorkflowExecution, node_id: &str) -> bool {
    exec.history.iter().any(|e| e.node_id == node_id)
}

/// Wait until the execution has a pending agent task and return its message id.
async fn pending_message(engine: &WorkflowEngine, execution_id: &str) -> String {
    for _ in 0..10_000 {
        if let Some(handle) = engine.registry().get(execution_id) {
            if let Some(id) = handle.pending().message_ids().into_iter().next() {
                return id;
            }
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("execution {execution_id} never dispatched an agent task");
}

fn settled_events(rx: &mut tokio::sync::broadcast::Receiver<ExecutionEvent>) -> usize {
    let mut count = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ExecutionEvent::AgentSettled { .. }) {
            count += 1;
        }
    }
    count
}

// ── Linear runs ─────────────────────────────────────────────────

#[tokio::test]
async fn echo_workflow_completes() {
    let engine = WorkflowEngine::builder().build();
    let exec = engine
        .execute(&echo_workflow(), inputs(json!({"x": 1})))
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.node_outputs["tool"], json!({"x": 1}));
    assert_eq!(exec.outputs.as_ref(), Some(&exec.variables));
    assert_eq!(exec.variables["x"], json!(1));
    assert_eq!(
        statuses(&exec),
        vec![
            ("start", HistoryStatus::Completed),
            ("tool", HistoryStatus::Completed),
            ("end", HistoryStatus::Completed),
        ]
    );
    assert!(exec.started_at.is_some() && exec.completed_at.is_some());
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn diamond_runs_each_node_once() {
    let wf = Workflow::new("diamond", "s")
        .with_node(Node::start("s"))
        .with_node(Node::tool("a", "a", "echo"))
        .with_node(Node::tool("b", "b", "echo"))
        .with_node(Node::tool("c", "c", "echo"))
        .with_node(Node::end("e"))
        .connect("s", "a")
        .connect("s", "b")
        .connect("a", "c")
        .connect("b", "c")
        .connect("c", "e");

    let exec = WorkflowEngine::builder()
        .build()
        .execute(&wf, Default::default())
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let order: Vec<&str> = exec.history.iter().map(|e| e.node_id.as_str()).collect();
    assert_eq!(order, vec!["s", "a", "c", "e", "b"]);
}

#[tokio::test]
async fn unregistered_tool_is_noop() {
    let wf = Workflow::new("wf", "s")
        .with_node(Node::start("s"))
        .with_node(Node::tool("t", "t", "not_a_tool"))
        .with_node(Node::end("e"))
        .connect("s", "t")
        .connect("t", "e");

    let exec = WorkflowEngine::builder().build().execute(&wf, Default::default()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let entry = exec.entry_for("t").unwrap();
    assert_eq!(entry.status, HistoryStatus::Completed);
    assert!(entry.output.is_none());
    assert!(!exec.node_outputs.contains_key("t"));
    assert!(ran(&exec, "e"));
}

#[tokio::test]
async fn lifecycle_events_are_published() {
    let engine = WorkflowEngine::builder().build();
    let mut rx = engine.event_bus().subscribe();
    engine.execute(&echo_workflow(), Default::default()).await.unwrap();

    let mut started = 0;
    let mut finished = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            ExecutionEvent::Started { .. } => started += 1,
            ExecutionEvent::Finished { status, .. } => finished = Some(status),
            _ => {}
        }
    }
    assert_eq!(started, 1);
    assert_eq!(finished, Some(ExecutionStatus::Completed));
}

// ── Failure propagation ─────────────────────────────────────────

fn failing_workflow(continue_on_error: bool) -> Workflow {
    Workflow::new("failing", "s")
        .with_node(Node::start("s"))
        .with_node(Node::tool("bad", "bad", "explode"))
        .with_node(Node::tool("after", "after", "echo").with_param("ok", json!(true)))
        .with_node(Node::end("e"))
        .connect("s", "bad")
        .connect("bad", "after")
        .connect("after", "e")
        .continue_on_error(continue_on_error)
}

#[tokio::test]
async fn continue_on_error_keeps_going() {
    let engine = WorkflowEngine::builder().with_tools(tools_with_failure()).build();
    let exec = engine.execute(&failing_workflow(true), Default::default()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let bad = exec.entry_for("bad").unwrap();
    assert_eq!(bad.status, HistoryStatus::Failed);
    assert!(bad.error.as_deref().unwrap().contains("boom"));
    assert!(!exec.node_outputs.contains_key("bad"));
    assert!(!exec.variables.contains_key("bad"));
    assert_eq!(exec.node_outputs["after"], json!({"ok": true}));
    assert!(exec.error.is_none());
}

#[tokio::test]
async fn failure_halts_run() {
    let engine = WorkflowEngine::builder().with_tools(tools_with_failure()).build();
    let exec = engine.execute(&failing_workflow(false), Default::default()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    let error = exec.error.as_ref().unwrap();
    assert_eq!(error.node_id, "bad");
    assert!(error.message.contains("boom"));
    assert!(!ran(&exec, "after"));
    assert!(!ran(&exec, "e"));
    assert!(exec.outputs.is_none());
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn resolve_error_fails_node() {
    let wf = Workflow::new("wf", "s")
        .with_node(Node::start("s"))
        .with_node(
            Node::tool("t", "t", "echo")
                .with_param("k", json!({"type": "reference", "source": "vault", "path": "key"})),
        )
        .connect("s", "t");

    let exec = WorkflowEngine::builder().build().execute(&wf, Default::default()).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.unwrap().message.contains("unknown source"));
}

// ── Decisions ───────────────────────────────────────────────────

#[tokio::test]
async fn decision_follows_yes_and_no() {
    let engine = WorkflowEngine::builder().build();
    let wf = decision_workflow("{{approved}}");

    let yes = engine.execute(&wf, inputs(json!({"approved": true}))).await.unwrap();
    assert!(ran(&yes, "yes_branch"));
    assert!(!ran(&yes, "no_branch"));
    assert_eq!(yes.node_outputs["check"]["branch"], json!("check-yes"));

    let no = engine.execute(&wf, inputs(json!({"approved": false}))).await.unwrap();
    assert!(ran(&no, "no_branch"));
    assert!(!ran(&no, "yes_branch"));
    assert_eq!(no.node_outputs["check"]["result"], json!(false));
}

#[tokio::test]
async fn decision_with_comparison() {
    let engine = WorkflowEngine::builder().build();
    let wf = decision_workflow("{{score}} >= 70 && '{{tier}}' == gold");

    let exec = engine
        .execute(&wf, inputs(json!({"score": 82, "tier": "gold"})))
        .await
        .unwrap();
    assert!(ran(&exec, "yes_branch"));
    assert_eq!(exec.node_outputs["check"]["condition"], json!("82 >= 70 && 'gold' == gold"));
}

#[tokio::test]
async fn decision_without_matching_edge_stops_silently() {
    let wf = Workflow::new("wf", "s")
        .with_node(Node::start("s"))
        .with_node(Node::decision("d", "d", "false"))
        .with_node(Node::end("e"))
        .connect("s", "d")
        .with_edge(Edge::new("d-yes", "d", "e").with_label("yes"));

    let exec = WorkflowEngine::builder().build().execute(&wf, Default::default()).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.entry_for("d").unwrap().status, HistoryStatus::Completed);
    assert_eq!(exec.node_outputs["d"]["branch"], Value::Null);
    assert!(!ran(&exec, "e"));
}

#[tokio::test]
async fn bad_condition_fails_node() {
    let exec = WorkflowEngine::builder()
        .build()
        .execute(&decision_workflow("{{score}} >"), inputs(json!({"score": 1})))
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error.unwrap().node_id, "check");
}

#[tokio::test]
async fn failed_decision_takes_no_branch() {
    let wf = decision_workflow("{{score}} >").continue_on_error(true);
    let exec = WorkflowEngine::builder()
        .build()
        .execute(&wf, inputs(json!({"score": 1})))
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.entry_for("check").unwrap().status, HistoryStatus::Failed);
    assert!(!ran(&exec, "yes_branch"));
    assert!(!ran(&exec, "no_branch"));
}

#[tokio::test]
async fn condition_values_are_never_parsed() {
    let engine = WorkflowEngine::builder().build();
    let wf = decision_workflow("{{reason}} == ok");

    for reason in ["don't know", "x || true", "ok' || 'x"] {
        let exec = engine.execute(&wf, inputs(json!({ "reason": reason }))).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed, "reason {reason:?}");
        assert!(ran(&exec, "no_branch"), "reason {reason:?}");
        assert!(!ran(&exec, "yes_branch"), "reason {reason:?}");
    }

    let exec = engine.execute(&wf, inputs(json!({"reason": "ok"}))).await.unwrap();
    assert!(ran(&exec, "yes_branch"));
    assert_eq!(exec.node_outputs["check"]["condition"], json!("ok == ok"));
}

// ── Agent dispatch ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn poll_only_settles_once() {
    let inbox = Arc::new(MockInbox::new().reply_after(2, completed_status(json!("summary"))));
    let engine = engine_with_inbox(&inbox, 2_000);
    let mut rx = engine.event_bus().subscribe();

    let exec = engine
        .execute(&agent_workflow(None), inputs(json!({"topic": "rust"})))
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.node_outputs["agent"], json!("summary"));
    assert_eq!(exec.variables["reply"], json!("summary"));
    assert_eq!(inbox.poll_count("msg-1"), 2);
    assert_eq!(settled_events(&mut rx), 1);

    let sent = inbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "summarizer@agents");
    assert_eq!(sent[0].from, "weft");
    assert_eq!(sent[0].task, "Summarize rust");
    assert_eq!(sent[0].metadata.execution_id, exec.id);
    assert_eq!(sent[0].metadata.node_id, "agent");
}

#[tokio::test]
async fn callback_only_settles_once() {
    let inbox = Arc::new(MockInbox::new());
    let engine = Arc::new(engine_with_inbox(&inbox, 60_000));
    let wf = agent_workflow(None);
    let exec = engine.prepare(&wf, inputs(json!({"topic": "rust"}))).unwrap();
    let execution_id = exec.id.clone();

    let run = tokio::spawn({
        let engine = Arc::clone(&engine);
        let wf = wf.clone();
        async move { engine.run(&wf, exec).await }
    });

    let message_id = pending_message(&engine, &execution_id).await;
    assert_eq!(message_id, "msg-1");
    assert!(engine.deliver_callback(&message_id, AgentOutcome::Completed(json!("from callback"))));
    assert!(!engine.deliver_callback(&message_id, AgentOutcome::Completed(json!("again"))));

    let exec = run.await.unwrap().unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.node_outputs["agent"], json!("from callback"));
    assert_eq!(inbox.total_polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn callback_then_poll_is_noop() {
    let inbox = Arc::new(MockInbox::new());
    let engine = Arc::new(engine_with_inbox(&inbox, 1_000));
    let mut rx = engine.event_bus().subscribe();
    let wf = agent_workflow(None);
    let exec = engine.prepare(&wf, inputs(json!({"topic": "rust"}))).unwrap();
    let execution_id = exec.id.clone();

    let run = tokio::spawn({
        let engine = Arc::clone(&engine);
        let wf = wf.clone();
        async move { engine.run(&wf, exec).await }
    });

    let message_id = pending_message(&engine, &execution_id).await;
    assert!(engine.deliver_callback(&message_id, AgentOutcome::Completed(json!("callback"))));
    inbox.set_status(&message_id, completed_status(json!("poll")));

    let exec = run.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(exec.node_outputs["agent"], json!("callback"));
    assert_eq!(settled_events(&mut rx), 1);
    assert!(!engine.deliver_callback(&message_id, AgentOutcome::Completed(json!("late"))));
}

#[tokio::test(start_paused = true)]
async fn timeout_fires_after_exact_window() {
    let inbox = Arc::new(MockInbox::new());
    let engine = engine_with_inbox(&inbox, 2_000);

    let started = tokio::time::Instant::now();
    let exec = engine
        .execute(&agent_workflow(Some(5_000)), inputs(json!({"topic": "rust"})))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(5_000), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(5_010), "fired late: {elapsed:?}");
    assert_eq!(exec.status, ExecutionStatus::Failed);
    let error = exec.error.unwrap();
    assert_eq!(error.node_id, "agent");
    assert!(error.message.contains("timed out after 5000ms"));
    assert_eq!(inbox.total_polls(), 2);

    assert!(!engine.deliver_callback("msg-1", AgentOutcome::Completed(json!("late"))));
}

#[tokio::test(start_paused = true)]
async fn default_timeout_comes_from_config() {
    let inbox = Arc::new(MockInbox::new());
    let engine = WorkflowEngine::builder()
        .with_config(EngineConfig {
            default_agent_timeout_ms: 750,
            poll_interval_ms: 10_000,
            ..EngineConfig::default()
        })
        .with_inbox(inbox.clone())
        .build();

    let started = tokio::time::Instant::now();
    let exec = engine.execute(&agent_workflow(None), Default::default()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(exec.error.unwrap().message.contains("750ms"));
}

#[tokio::test(start_paused = true)]
async fn agent_failure_fails_node() {
    let inbox = Arc::new(MockInbox::new().reply_after(1, failed_status("refused")));
    let engine = engine_with_inbox(&inbox, 500);
    let exec = engine.execute(&agent_workflow(None), Default::default()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.unwrap().message.contains("refused"));
}

#[tokio::test(start_paused = true)]
async fn transient_poll_errors_keep_polling() {
    let inbox = Arc::new(
        MockInbox::new()
            .fail_polls(2)
            .reply_after(1, completed_status(json!("eventually"))),
    );
    let engine = engine_with_inbox(&inbox, 500);
    let exec = engine.execute(&agent_workflow(None), Default::default()).await.unwrap();

    assert_eq!(exec.node_outputs["agent"], json!("eventually"));
    assert_eq!(inbox.poll_count("msg-1"), 3);
}

#[tokio::test(start_paused = true)]
async fn missing_message_id_gets_generated_key() {
    let inbox = Arc::new(MockInbox::without_ids().reply_after(1, completed_status(json!("ok"))));
    let engine = engine_with_inbox(&inbox, 500);
    let exec = engine.execute(&agent_workflow(None), Default::default()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.node_outputs["agent"], json!("ok"));
    assert_eq!(inbox.total_polls(), 1);
}

#[tokio::test]
async fn send_failure_fails_node() {
    let inbox = Arc::new(MockInbox::failing("inbox down"));
    let engine = engine_with_inbox(&inbox, 500);
    let exec = engine.execute(&agent_workflow(None), Default::default()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.unwrap().message.contains("inbox down"));
}

#[tokio::test]
async fn agent_without_inbox_fails_node() {
    let exec = WorkflowEngine::builder()
        .build()
        .execute(&agent_workflow(None), Default::default())
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn request_cancel_tears_down_dispatch() {
    let inbox = Arc::new(MockInbox::new());
    let engine = Arc::new(engine_with_inbox(&inbox, 60_000));
    let wf = agent_workflow(None);
    let exec = engine.prepare(&wf, Default::default()).unwrap();
    let execution_id = exec.id.clone();

    let run = tokio::spawn({
        let engine = Arc::clone(&engine);
        let wf = wf.clone();
        async move { engine.run(&wf, exec).await }
    });

    let message_id = pending_message(&engine, &execution_id).await;
    assert!(engine.request_cancel(&execution_id));

    let exec = run.await.unwrap().unwrap();
    assert_eq!(exec.status, ExecutionStatus::Cancelled);
    assert_eq!(exec.entry_for("agent").unwrap().status, HistoryStatus::Skipped);
    assert!(!ran(&exec, "end"));
    assert!(engine.registry().is_empty());
    assert!(!engine.deliver_callback(&message_id, AgentOutcome::Completed(json!("late"))));
}

// ── Registry ────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let engine = WorkflowEngine::builder().build();
    let wf = echo_workflow();
    let exec = engine.prepare(&wf, Default::default()).unwrap();
    engine
        .registry()
        .register(Arc::new(ExecutionHandle::new(
            exec.id.clone(),
            wf.id.clone(),
            engine.event_bus().clone(),
        )))
        .unwrap();

    let err = engine.run(&wf, exec).await.unwrap_err();
    assert!(matches!(err, WeftError::DuplicateExecution(_)));
}

// ── Human input ─────────────────────────────────────────────────

#[tokio::test]
async fn human_node_pauses_and_resumes() {
    let engine = WorkflowEngine::builder().build();
    let wf = human_workflow();

    let paused = engine.execute(&wf, inputs(json!({"request": "deploy"}))).await.unwrap();
    assert_eq!(paused.status, ExecutionStatus::Paused);
    assert_eq!(paused.current_node_id.as_deref(), Some("approval"));
    let waiting = paused.entry_for("approval").unwrap();
    assert_eq!(waiting.status, HistoryStatus::Running);
    assert_eq!(waiting.waiting_for, Some(WaitingFor::HumanInput));
    assert!(!ran(&paused, "after"));
    assert!(engine.registry().is_empty());

    let done = engine
        .resume(&wf, paused, json!({"approved": true}))
        .await
        .unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.entry_for("approval").unwrap().status, HistoryStatus::Completed);
    assert_eq!(done.node_outputs["after"], json!({"approved": true}));
    assert_eq!(done.history.iter().filter(|e| e.node_id == "start").count(), 1);
    assert!(done.outputs.is_some());
}

#[tokio::test]
async fn resume_requires_paused() {
    let engine = WorkflowEngine::builder().build();
    let wf = echo_workflow();
    let exec = engine.execute(&wf, Default::default()).await.unwrap();
    let err = engine.resume(&wf, exec, json!({})).await.unwrap_err();
    assert!(matches!(err, WeftError::InvalidTransition { .. }));
}

#[tokio::test]
async fn cancel_paused_execution() {
    let engine = WorkflowEngine::builder().build();
    let wf = human_workflow();
    let mut exec = engine.execute(&wf, Default::default()).await.unwrap();

    engine.cancel(&mut exec).unwrap();
    assert_eq!(exec.status, ExecutionStatus::Cancelled);
    assert_eq!(exec.entry_for("approval").unwrap().status, HistoryStatus::Skipped);

    let err = engine.resume(&wf, exec, json!({})).await.unwrap_err();
    assert!(matches!(err, WeftError::InvalidTransition { .. }));
}

// ── Parallel / join / loop ──────────────────────────────────────

#[tokio::test]
async fn join_waits_for_all_branches() {
    let wf = Workflow::new("fanout", "s")
        .with_node(Node::start("s"))
        .with_node(Node::new("p", "p", NodeKind::Parallel))
        .with_node(Node::tool("a", "left", "echo").with_param("side", json!("a")))
        .with_node(Node::tool("b", "right", "echo").with_param("side", json!("b")))
        .with_node(Node::new("j", "joined", NodeKind::Join { wait_for: vec![] }))
        .with_node(Node::end("e"))
        .connect("s", "p")
        .connect("p", "a")
        .connect("p", "b")
        .connect("a", "j")
        .connect("b", "j")
        .connect("j", "e");

    let exec = WorkflowEngine::builder().build().execute(&wf, Default::default()).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let order: Vec<&str> = exec.history.iter().map(|e| e.node_id.as_str()).collect();
    assert_eq!(order, vec!["s", "p", "a", "b", "j", "e"]);
    assert_eq!(exec.node_outputs["p"], json!({"branches": ["a", "b"]}));
    assert_eq!(
        exec.node_outputs["j"],
        json!({"left": {"side": "a"}, "right": {"side": "b"}})
    );
}

#[tokio::test]
async fn join_with_explicit_wait_list() {
    let wf = Workflow::new("wf", "s")
        .with_node(Node::start("s"))
        .with_node(Node::tool("a", "a", "echo"))
        .with_node(Node::new("j", "j", NodeKind::Join { wait_for: vec!["a".into(), "never".into()] }))
        .with_node(Node::tool("never", "never", "echo"))
        .connect("s", "a")
        .connect("a", "j");

    let exec = WorkflowEngine::builder().build().execute(&wf, Default::default()).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert!(!ran(&exec, "j"));
}

fn loop_workflow(max_iterations: usize) -> Workflow {
    Workflow::new("loop", "s")
        .with_node(Node::start("s"))
        .with_node(Node::new(
            "each",
            "each",
            NodeKind::Loop {
                items: json!({"type": "reference", "source": "input", "path": "list"}),
                max_iterations,
                item_variable: "item".into(),
            },
        ))
        .with_node(
            Node::tool("body", "step", "echo")
                .with_param("value", json!({"type": "template", "template": "{{item}}-{{index}}"})),
        )
        .with_node(Node::end("e"))
        .connect("s", "each")
        .with_edge(Edge::new("each-body", "each", "body").with_label("body"))
        .connect("body", "each")
        .connect("each", "e")
}

#[tokio::test]
async fn loop_runs_body_per_item() {
    let exec = WorkflowEngine::builder()
        .build()
        .execute(&loop_workflow(100), inputs(json!({"list": ["a", "b"]})))
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(
        exec.node_outputs["each"],
        json!([{"step": {"value": "a-0"}}, {"step": {"value": "b-1"}}])
    );
    assert_eq!(exec.history.iter().filter(|e| e.node_id == "body").count(), 2);
    assert_eq!(exec.history.iter().filter(|e| e.node_id == "e").count(), 1);
}

#[tokio::test]
async fn loop_respects_budget() {
    let exec = WorkflowEngine::builder()
        .build()
        .execute(&loop_workflow(1), inputs(json!({"list": ["a", "b", "c"]})))
        .await
        .unwrap();

    assert_eq!(exec.node_outputs["each"].as_array().unwrap().len(), 1);
    assert_eq!(exec.history.iter().filter(|e| e.node_id == "body").count(), 1);
}

// ── Council ─────────────────────────────────────────────────────

fn council_workflow() -> Workflow {
    Workflow::new("council", "s")
        .with_node(Node::start("s"))
        .with_node(Node::new(
            "c",
            "opinions",
            NodeKind::Council {
                prompt: "Is {{idea}} good?".into(),
                models: vec!["m1".into(), "m2".into()],
            },
        ))
        .connect("s", "c")
}

#[tokio::test]
async fn council_node_stores_result() {
    let council = Arc::new(MockCouncil::answering("yes"));
    let engine = WorkflowEngine::builder().with_council(council.clone()).build();
    let exec = engine
        .execute(&council_workflow(), inputs(json!({"idea": "tea"})))
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.variables["opinions"]["responses"].as_array().unwrap().len(), 2);
    assert_eq!(council.queries()[0].0, "Is tea good?");
}

#[tokio::test]
async fn council_errors_fail_node() {
    let engine = WorkflowEngine::builder()
        .with_council(Arc::new(MockCouncil::failing("quorum lost")))
        .build();
    let exec = engine.execute(&council_workflow(), Default::default()).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.unwrap().message.contains("quorum lost"));

    let unconfigured = WorkflowEngine::builder()
        .build()
        .execute(&council_workflow(), Default::default())
        .await
        .unwrap();
    assert_eq!(unconfigured.status, ExecutionStatus::Failed);
}
