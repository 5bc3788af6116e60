pub mod data;
pub mod echo;
pub mod network;

pub use data::{JsonQueryTool, TextTemplateTool};
pub use echo::EchoTool;
pub use network::HttpRequestTool;
