use weft_core::workflow::{Edge, Workflow};

/// Pick the single outgoing edge a decision node follows.
///
/// A boolean edge (label "yes"/"no" or an `is_true`/`is_false` condition)
/// matching `result` wins. Otherwise the first edge whose comparison matches
/// the interpolated condition text is taken. `None` means a dead end.
pub fn select_branch<'a>(
    workflow: &'a Workflow,
    node_id: &str,
    text: &str,
    result: bool,
) -> Option<&'a Edge> {
    let wanted = if result { "yes" } else { "no" };

    workflow
        .outgoing(node_id)
        .find(|edge| {
            edge.has_label(wanted)
                || edge
                    .condition
                    .as_ref()
                    .is_some_and(|cond| cond.matches_bool(result))
        })
        .or_else(|| {
            workflow.outgoing(node_id).find(|edge| {
                edge.condition
                    .as_ref()
                    .is_some_and(|cond| cond.matches_text(text))
            })
        })
}
