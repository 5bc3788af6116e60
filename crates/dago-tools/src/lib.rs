pub mod builtin;
pub mod registry;
pub mod router;

pub use registry::{FnTool, FunctionRegistry};
pub use router::ToolRouter;
