pub mod events;
pub mod health;
pub mod worker;

pub use events::EventPublisher;
pub use health::HealthServer;
pub use worker::{Worker, WorkerConfig};
