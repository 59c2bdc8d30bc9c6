pub mod identity;
pub mod job;
pub mod pull_request;
pub mod repository;
pub mod tracked_message;
pub mod workspace;
