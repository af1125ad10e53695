pub mod function;
pub mod registry;

pub use function::FunctionTool;
pub use registry::ToolRegistry;
