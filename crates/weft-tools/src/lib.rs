pub mod builtin;
pub mod function;
pub mod registry;

pub use function::FnTool;
pub use registry::ToolRegistry;
