//! Upload events published to the broker.

use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Wake-up message emitted when a video is uploaded.
///
/// Not a source of truth: the job store holds the authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEvent {
    /// Job / video identifier
    pub video_id: i64,
    /// Filename at upload time
    pub filename: String,
}

impl UploadEvent {
    pub fn new(video_id: i64, filename: impl Into<String>) -> Self {
        Self {
            video_id,
            filename: filename.into(),
        }
    }

    pub fn job_id(&self) -> JobId {
        JobId(self.video_id)
    }

    /// Decode a broker payload.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Encode for publishing.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
