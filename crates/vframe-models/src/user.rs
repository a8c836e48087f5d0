//! Job owners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user. Read-only from the worker's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether a notification can be addressed to this user.
    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }
}
