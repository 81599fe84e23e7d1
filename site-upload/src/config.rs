//! Pipeline configuration.
//!
//! Everything is a plain builder struct with sensible defaults. Device
//! tunables arrive as an injected [`DeviceProfile`]; the pipeline never
//! inspects the runtime environment to pick one.
//!
//! ```rust
//! use site_upload::{DeviceProfile, UploadConfig};
//!
//! let config = UploadConfig::new("qa-photos")
//!     .with_destination_prefix("insp-42/item-7")
//!     .with_max_retries(5)
//!     .with_device(DeviceProfile::mobile());
//!
//! assert_eq!(config.retry.max_retries, 5);
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{RetryPolicy, UploadError, UploadResult, ValidationError};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// Resource tunables for the runtime the pipeline runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Maximum items simultaneously holding a dispatch slot
    pub max_concurrent_uploads: usize,

    /// Payloads above this size are written in sequential chunks
    pub chunk_size_bytes: u64,

    /// Longest edge (px) after image preprocessing
    pub max_image_dimension: u32,

    /// Size the preprocessor aims for
    pub target_image_bytes: u64,
}

impl DeviceProfile {
    /// Desktop-class machine on a reasonable connection
    pub fn desktop() -> Self {
        Self {
            max_concurrent_uploads: 4,
            chunk_size_bytes: 5 * MIB,
            max_image_dimension: 1920,
            target_image_bytes: 800 * KIB,
        }
    }

    /// Phone or tablet on site
    pub fn mobile() -> Self {
        Self {
            max_concurrent_uploads: 2,
            chunk_size_bytes: MIB,
            max_image_dimension: 1280,
            target_image_bytes: 500 * KIB,
        }
    }

    pub fn with_max_concurrent_uploads(mut self, max: usize) -> Self {
        self.max_concurrent_uploads = max;
        self
    }

    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size_bytes = bytes;
        self
    }

    pub fn with_max_image_dimension(mut self, px: u32) -> Self {
        self.max_image_dimension = px;
        self
    }

    pub fn with_target_image_bytes(mut self, bytes: u64) -> Self {
        self.target_image_bytes = bytes;
        self
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::desktop()
    }
}

/// Submission-time file checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRules {
    /// Absolute max size allowed for a single file
    pub max_file_bytes: u64,

    /// Accepted MIME patterns: exact (`application/pdf`) or wildcard (`image/*`).
    /// Empty accepts everything.
    pub allowed_types: Vec<String>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            max_file_bytes: 50 * MIB,
            allowed_types: vec![
                "image/*".to_string(),
                "video/*".to_string(),
                "application/pdf".to_string(),
                "application/msword".to_string(),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string(),
                "application/vnd.ms-excel".to_string(),
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
                "text/csv".to_string(),
                "text/plain".to_string(),
            ],
        }
    }
}

impl ValidationRules {
    /// Accept any type up to `max_file_bytes`
    pub fn permissive(max_file_bytes: u64) -> Self {
        Self {
            max_file_bytes,
            allowed_types: Vec::new(),
        }
    }

    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    pub fn allow_type<S: Into<String>>(mut self, pattern: S) -> Self {
        self.allowed_types.push(pattern.into());
        self
    }

    pub fn accepts_type(&self, mime_type: &str) -> bool {
        if self.allowed_types.is_empty() {
            return true;
        }
        let mime_type = mime_type.to_ascii_lowercase();
        self.allowed_types.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            match pattern.strip_suffix("/*") {
                Some(top) => mime_type
                    .split_once('/')
                    .map_or(false, |(candidate, _)| candidate == top),
                None => pattern == mime_type,
            }
        })
    }

    /// Check one file against the rules
    pub fn validate(&self, mime_type: &str, size_bytes: u64) -> Result<(), ValidationError> {
        if size_bytes == 0 {
            return Err(ValidationError::Empty);
        }
        if size_bytes > self.max_file_bytes {
            return Err(ValidationError::TooLarge {
                size: size_bytes,
                max: self.max_file_bytes,
            });
        }
        if !self.accepts_type(mime_type) {
            return Err(ValidationError::UnsupportedType {
                mime_type: mime_type.to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration for the upload manager
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Target bucket name
    pub bucket: String,

    /// Prepended to every destination path, e.g. `{inspection_id}/{checklist_item_id}`
    pub destination_prefix: String,

    /// When false, dispatch and retries ignore connectivity
    pub enable_offline_queue: bool,

    pub device: DeviceProfile,

    pub retry: RetryPolicy,

    pub validation: ValidationRules,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: "uploads".to_string(),
            destination_prefix: String::new(),
            enable_offline_queue: true,
            device: DeviceProfile::default(),
            retry: RetryPolicy::default(),
            validation: ValidationRules::default(),
        }
    }
}

impl UploadConfig {
    /// Create a config for `bucket` with defaults
    pub fn new<S: Into<String>>(bucket: S) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Layer `UPLOAD_*` environment variables over the defaults
    pub fn from_env() -> UploadResult<Self> {
        let mut config = Self::default();

        if let Ok(bucket) = env::var("UPLOAD_BUCKET") {
            config.bucket = bucket;
        }
        if let Ok(prefix) = env::var("UPLOAD_PREFIX") {
            config.destination_prefix = prefix;
        }
        if let Some(retries) = parse_env::<u32>("UPLOAD_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(offline) = parse_env::<bool>("UPLOAD_OFFLINE_QUEUE")? {
            config.enable_offline_queue = offline;
        }
        if let Some(max) = parse_env::<usize>("UPLOAD_MAX_CONCURRENT")? {
            config.device.max_concurrent_uploads = max;
        }
        if let Some(bytes) = parse_env::<u64>("UPLOAD_CHUNK_BYTES")? {
            config.device.chunk_size_bytes = bytes;
        }
        if let Some(bytes) = parse_env::<u64>("UPLOAD_MAX_FILE_BYTES")? {
            config.validation.max_file_bytes = bytes;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_destination_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.destination_prefix = prefix.into();
        self
    }

    /// Retries after the first attempt (total attempts = `max_retries + 1`)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_offline_queue(mut self, enabled: bool) -> Self {
        self.enable_offline_queue = enabled;
        self
    }

    pub fn with_device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.retry.base_delay = base_delay;
        self.retry.max_delay = max_delay;
        self
    }

    pub fn with_validation(mut self, validation: ValidationRules) -> Self {
        self.validation = validation;
        self
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> UploadResult<()> {
        if self.device.max_concurrent_uploads == 0 {
            return Err(UploadError::config("max_concurrent_uploads must be at least 1"));
        }
        if self.device.chunk_size_bytes == 0 {
            return Err(UploadError::config("chunk_size_bytes must be at least 1"));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(UploadError::config("max_delay must not be shorter than base_delay"));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str) -> UploadResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| UploadError::config(format!("{} has invalid value {:?}", key, raw))),
        Err(_) => Ok(None),
    }
}
