//! Redis Streams subscription for upload events.
//!
//! This crate provides:
//! - A durable consumer group on the upload stream
//! - At-least-once delivery with ack, nak and redelivery of idle entries
//! - A dead letter stream for entries that keep failing

pub mod error;
pub mod stream;

pub use error::{QueueError, QueueResult};
pub use stream::{Delivery, QueueConfig, UploadStream};
