//! FILENAME: quota-cells/src/subset.rs
//! The respondent population scope (a survey market or segment).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a respondent population. Weightings, quota cells and response
/// accessors are always scoped to exactly one subset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subset {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

impl Subset {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Subset {
            display_name: id.clone(),
            id,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
