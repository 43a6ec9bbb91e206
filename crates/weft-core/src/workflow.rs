//! Workflow templates: nodes, edges and the checks run before execution.
//!
//! A [`Workflow`] is immutable once handed to the engine. Node type payloads
//! are carried inline in the node object and tagged by `"type"`:
//!
//! ```json
//! { "id": "fetch", "label": "page", "type": "tool", "tool": "http_request",
//!   "params": { "url": { "type": "template", "template": "{{site}}/index" } } }
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WeftError};

/// Immutable workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    pub start_node_id: String,
    #[serde(default)]
    pub config: WorkflowConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Record node failures and keep traversing instead of failing the run.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// A typed step in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Variable name under which this node's output is stored.
    #[serde(default)]
    pub label: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Node type tag plus its type-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    Tool {
        tool: String,
        #[serde(default)]
        params: serde_json::Map<String, Value>,
    },
    Decision {
        condition: String,
    },
    Human {
        #[serde(default)]
        prompt: Option<String>,
    },
    Council {
        prompt: String,
        #[serde(default)]
        models: Vec<String>,
    },
    Agent {
        /// Inbox address of the external agent.
        agent: String,
        prompt: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Loop {
        items: Value,
        #[serde(default = "default_max_iterations")]
        max_iterations: usize,
        #[serde(default = "default_item_variable")]
        item_variable: String,
    },
    Parallel,
    Join {
        /// Node ids that must complete first. Empty means every direct predecessor.
        #[serde(default)]
        wait_for: Vec<String>,
    },
}

fn default_max_iterations() -> usize {
    100
}

fn default_item_variable() -> String {
    "item".to_string()
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Tool { .. } => "tool",
            Self::Decision { .. } => "decision",
            Self::Human { .. } => "human",
            Self::Council { .. } => "council",
            Self::Agent { .. } => "agent",
            Self::Loop { .. } => "loop",
            Self::Parallel => "parallel",
            Self::Join { .. } => "join",
        }
    }
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, "start", NodeKind::Start)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, "end", NodeKind::End)
    }

    /// Tool node with no parameters; add them with [`Node::with_param`].
    pub fn tool(id: impl Into<String>, label: impl Into<String>, tool: impl Into<String>) -> Self {
        Self::new(
            id,
            label,
            NodeKind::Tool {
                tool: tool.into(),
                params: serde_json::Map::new(),
            },
        )
    }

    pub fn decision(
        id: impl Into<String>,
        label: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            label,
            NodeKind::Decision {
                condition: condition.into(),
            },
        )
    }

    pub fn agent(
        id: impl Into<String>,
        label: impl Into<String>,
        agent: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            label,
            NodeKind::Agent {
                agent: agent.into(),
                prompt: prompt.into(),
                timeout_ms: None,
            },
        )
    }

    pub fn human(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, label, NodeKind::Human { prompt: None })
    }

    /// Add a tool parameter. No-op for non-tool nodes.
    pub fn with_param(mut self, name: impl Into<String>, param: Value) -> Self {
        if let NodeKind::Tool { params, .. } = &mut self.kind {
            params.insert(name.into(), param);
        }
        self
    }

    /// Set the agent timeout. No-op for non-agent nodes.
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        if let NodeKind::Agent { timeout_ms, .. } = &mut self.kind {
            *timeout_ms = Some(ms);
        }
        self
    }

    /// Name used for this node's entry in the variable bag.
    pub fn variable_name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

/// Directed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub condition: Option<BranchCondition>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
            condition: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_condition(mut self, operator: BranchOperator, value: Value) -> Self {
        self.condition = Some(BranchCondition { operator, value });
        self
    }

    /// Case-insensitive label comparison.
    pub fn has_label(&self, label: &str) -> bool {
        self.label
            .as_deref()
            .is_some_and(|l| l.trim().eq_ignore_ascii_case(label))
    }
}

/// Structured branch condition attached to an edge leaving a decision node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCondition {
    pub operator: BranchOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOperator {
    #[serde(alias = "isTrue")]
    IsTrue,
    #[serde(alias = "isFalse")]
    IsFalse,
    Equals,
    #[serde(alias = "notEquals")]
    NotEquals,
    Contains,
    #[serde(alias = "greaterThan")]
    GreaterThan,
    #[serde(alias = "lessThan")]
    LessThan,
}

impl BranchCondition {
    /// Match against a decision's boolean result. Only `is_true`/`is_false` apply.
    pub fn matches_bool(&self, result: bool) -> bool {
        match self.operator {
            BranchOperator::IsTrue => result,
            BranchOperator::IsFalse => !result,
            _ => false,
        }
    }

    /// Match a comparison operator against the decision's interpolated text.
    pub fn matches_text(&self, text: &str) -> bool {
        let expected = match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let text = text.trim();
        match self.operator {
            BranchOperator::Equals => text == expected,
            BranchOperator::NotEquals => text != expected,
            BranchOperator::Contains => text.contains(expected.as_str()),
            BranchOperator::GreaterThan => numeric_pair(text, &expected).is_some_and(|(a, b)| a > b),
            BranchOperator::LessThan => numeric_pair(text, &expected).is_some_and(|(a, b)| a < b),
            BranchOperator::IsTrue | BranchOperator::IsFalse => false,
        }
    }
}

fn numeric_pair(a: &str, b: &str) -> Option<(f64, f64)> {
    Some((a.parse().ok()?, b.trim().parse().ok()?))
}

impl Workflow {
    pub fn new(id: impl Into<String>, start_node_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            description: None,
            nodes: vec![],
            edges: vec![],
            start_node_id: start_node_id.into(),
            config: WorkflowConfig::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Connect two nodes with an unlabeled edge, generating the edge id.
    pub fn connect(self, source: &str, target: &str) -> Self {
        let id = format!("{}->{}", source, target);
        self.with_edge(Edge::new(id, source, target))
    }

    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.config.continue_on_error = enabled;
        self
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing<'w, 'n>(&'w self, node_id: &'n str) -> impl Iterator<Item = &'w Edge> + 'n
    where
        'w: 'n,
    {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    pub fn incoming<'w, 'n>(&'w self, node_id: &'n str) -> impl Iterator<Item = &'w Edge> + 'n
    where
        'w: 'n,
    {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Structural checks that must pass before any node runs.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(WeftError::Traversal(format!(
                "workflow '{}' has no nodes",
                self.id
            )));
        }

        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(WeftError::Traversal(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        if !ids.contains(self.start_node_id.as_str()) {
            return Err(WeftError::Traversal(format!(
                "start node '{}' not found",
                self.start_node_id
            )));
        }

        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(WeftError::Traversal(format!(
                        "edge '{}' references unknown node '{}'",
                        edge.id, endpoint
                    )));
                }
            }
        }

        Ok(())
    }

    /// Authoring-time warnings. These never stop a run.
    pub fn lint(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for node in &self.nodes {
            match &node.kind {
                NodeKind::Decision { .. } => {
                    let branches = self
                        .outgoing(&node.id)
                        .filter(|e| {
                            e.has_label("yes") || e.has_label("no") || e.condition.is_some()
                        })
                        .count();
                    if branches == 0 {
                        warnings.push(format!(
                            "decision '{}' has no Yes/No or conditioned edges; it will dead-end",
                            node.id
                        ));
                    }
                }
                NodeKind::Loop { .. } => {
                    if !self.outgoing(&node.id).any(|e| e.has_label("body")) {
                        warnings.push(format!("loop '{}' has no edge labeled 'body'", node.id));
                    }
                }
                NodeKind::Join { wait_for } => {
                    for id in wait_for {
                        if self.node(id).is_none() {
                            warnings.push(format!(
                                "join '{}' waits for unknown node '{}'",
                                node.id, id
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        let reachable = self.reachable_from(&self.start_node_id);
        for node in &self.nodes {
            if !reachable.contains(node.id.as_str()) {
                warnings.push(format!("node '{}' is unreachable from the start node", node.id));
            }
        }

        let mut labels: HashMap<&str, &str> = HashMap::new();
        for node in &self.nodes {
            if let Some(other) = labels.insert(node.variable_name(), &node.id) {
                warnings.push(format!(
                    "nodes '{}' and '{}' share the variable name '{}'",
                    other,
                    node.id,
                    node.variable_name()
                ));
            }
        }

        warnings
    }

    fn reachable_from<'a>(&'a self, start: &'a str) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(self.outgoing(id).map(|e| e.target.as_str()));
            }
        }
        seen
    }
}
