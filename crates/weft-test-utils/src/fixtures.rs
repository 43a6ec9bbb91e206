use std::path::PathBuf;

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use weft_core::workflow::{Edge, Node, NodeKind, Workflow};

/// Turn a JSON object literal into an input map.
pub fn inputs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("inputs must be a JSON object, got {other}"),
    }
}

fn input_ref(path: &str) -> Value {
    json!({"type": "reference", "source": "input", "path": path})
}

/// `start -> tool(echo, x = input.x) -> end`
pub fn echo_workflow() -> Workflow {
    Workflow::new("echo", "start")
        .with_name("Echo")
        .with_node(Node::start("start"))
        .with_node(Node::tool("tool", "tool", "echo").with_param("x", input_ref("x")))
        .with_node(Node::end("end"))
        .connect("start", "tool")
        .connect("tool", "end")
}

/// `start -> agent(reply) -> end`, agent prompt `Summarize {{topic}}`.
pub fn agent_workflow(timeout_ms: Option<u64>) -> Workflow {
    let mut agent = Node::agent("agent", "reply", "summarizer@agents", "Summarize {{topic}}");
    if let Some(ms) = timeout_ms {
        agent = agent.with_timeout_ms(ms);
    }
    Workflow::new("agent", "start")
        .with_node(Node::start("start"))
        .with_node(agent)
        .with_node(Node::end("end"))
        .connect("start", "agent")
        .connect("agent", "end")
}

/// `start -> decision(condition)`, "Yes" to `yes_branch`, "No" to `no_branch`.
pub fn decision_workflow(condition: &str) -> Workflow {
    Workflow::new("decision", "start")
        .with_node(Node::start("start"))
        .with_node(Node::decision("check", "check", condition))
        .with_node(Node::tool("yes_branch", "yes_branch", "echo").with_param("branch", json!("yes")))
        .with_node(Node::tool("no_branch", "no_branch", "echo").with_param("branch", json!("no")))
        .connect("start", "check")
        .with_edge(Edge::new("check-yes", "check", "yes_branch").with_label("Yes"))
        .with_edge(Edge::new("check-no", "check", "no_branch").with_label("No"))
}

/// `start -> human(approval) -> tool(after) -> end`
pub fn human_workflow() -> Workflow {
    Workflow::new("approval", "start")
        .with_node(Node::start("start"))
        .with_node(Node::new(
            "approval",
            "approval",
            NodeKind::Human {
                prompt: Some("Approve {{request}}?".into()),
            },
        ))
        .with_node(
            Node::tool("after", "after", "echo").with_param(
                "approved",
                json!({"type": "reference", "source": "variable", "path": "approval.approved"}),
            ),
        )
        .with_node(Node::end("end"))
        .connect("start", "approval")
        .connect("approval", "after")
        .connect("after", "end")
}

/// Write `contents` to `weft.toml` in a fresh temp dir.
pub fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weft.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}
