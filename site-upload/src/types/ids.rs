use serde::{Deserialize, Serialize};
use std::fmt;

use site_blob::keys::{random_suffix, sanitize_file_name};

/// Unique identifier for an upload item
///
/// Generated at submission from the file name, a millisecond timestamp and a
/// random suffix: `{name}-{millis}-{random}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    /// Generate a new item ID for a file name
    pub fn generate(file_name: &str) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let name = sanitize_file_name(file_name);
        Self(format!("{}-{}-{}", name, millis, random_suffix(6)))
    }

    /// Create an item ID from a string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
