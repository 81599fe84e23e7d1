use serde::{Deserialize, Serialize};

/// Upload priority levels for dispatch ordering (Higher values = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPriority {
    /// Background uploads (dispatched last)
    Low = 1,

    /// Normal priority uploads (default)
    Normal = 2,

    /// Dispatched ahead of everything else, used for manual retries
    High = 3,
}

// Dispatch order: higher priority first, earlier submissions first within a priority

impl Default for UploadPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl UploadPriority {
    /// Get all priority levels in order (low to high)
    pub fn all() -> &'static [UploadPriority] {
        &[Self::Low, Self::Normal, Self::High]
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for UploadPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for UploadPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}
