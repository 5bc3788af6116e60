pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{DagoError, ErrorKind, Result};
pub use event::{EventType, NodeEvent};
pub use types::*;
