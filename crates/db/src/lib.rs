pub mod connection;
pub mod migrations;
pub mod queue;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use queue::{Delivery, InMemoryJobQueue, JobQueue, JobStore, QueueError, Settlement, SqlJobQueue};
pub use repositories::RepositoryError;
