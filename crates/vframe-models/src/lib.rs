//! Shared data models for the vframe worker.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their status state machine
//! - Upload events published to the broker
//! - Job owners (users) used for failure notification

pub mod event;
pub mod job;
pub mod user;

// Re-export common types
pub use event::UploadEvent;
pub use job::{Job, JobId, JobStatus, TransitionError};
pub use user::User;
