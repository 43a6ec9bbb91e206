pub mod council;
pub mod dispatch;
pub mod engine;
pub mod graph;
pub mod inbox;
pub mod registry;
pub mod resolver;

pub use council::HttpCouncilClient;
pub use dispatch::{AgentDispatcher, DispatchRequest, PendingAgentTask, PendingTasks};
pub use engine::{EngineBuilder, ExecutionClaim, WorkflowEngine};
pub use inbox::HttpInboxClient;
pub use registry::{ExecutionHandle, ExecutionRegistry};
pub use resolver::{ParameterResolver, ResolveContext, SourceFn};
