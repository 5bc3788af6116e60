pub mod executor;
pub mod mode;
pub mod spec;
pub mod template;

pub use executor::{Executor, ExecutorOptions};
pub use mode::{detect_mode, ExecutionMode};
pub use spec::{AgentSpec, LlmSettings, LlmSpec, NodeSpec, ToolSpec};
