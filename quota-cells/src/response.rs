//! FILENAME: quota-cells/src/response.rs
//! A single respondent record as seen by the weighting pipeline.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

pub type ResponseId = i32;

/// One survey response: an id, the time it was collected, and the coded
/// answers keyed by field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: ResponseId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    answers: FxHashMap<String, i32>,
}

impl ProfileResponse {
    pub fn new(id: ResponseId, timestamp: DateTime<Utc>) -> Self {
        ProfileResponse {
            id,
            timestamp,
            answers: FxHashMap::default(),
        }
    }

    pub fn with_answer(mut self, field: impl Into<String>, value: i32) -> Self {
        self.answers.insert(field.into(), value);
        self
    }

    pub fn set_answer(&mut self, field: impl Into<String>, value: i32) {
        self.answers.insert(field.into(), value);
    }

    pub fn answer(&self, field: &str) -> Option<i32> {
        self.answers.get(field).copied()
    }

    /// Timestamp in the integer unit used for range searches.
    pub fn ticks(&self) -> i64 {
        to_ticks(&self.timestamp)
    }
}

/// Converts a timestamp to microseconds since the epoch.
pub fn to_ticks(timestamp: &DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}
