//! Timestamp and identifier helpers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Generates a new random UUID (v4).
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// First eight hex characters of a UUID, for compact file names.
#[must_use]
pub fn short_id(id: &Uuid) -> String {
    id.simple().to_string().chars().take(8).collect()
}
