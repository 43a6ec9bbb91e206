//! Graph traversal: node behaviors, decision branching and the condition grammar.

pub mod branch;
pub mod condition;
pub mod executor;

pub use branch::select_branch;
pub use executor::{GraphExecutor, Halt};
