//! Object path generation.
//!
//! Every item gets a unique destination path and every chunk of that item a
//! unique derived path, so concurrent writers never collide in the bucket.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Strategy for generating object paths
pub trait PathStrategy: Send + Sync {
    /// Generate the destination path for a new object under `prefix`
    fn object_path(&self, prefix: &str, file_name: &str) -> String;

    /// Path of chunk `index` of the object stored at `path`
    fn chunk_path(&self, path: &str, index: u32) -> String;
}

/// Default strategy: `{prefix}/{millis}-{random}-{name}` and `{path}.chunk.{index}`
#[derive(Debug, Clone, Default)]
pub struct DefaultPathStrategy;

impl PathStrategy for DefaultPathStrategy {
    fn object_path(&self, prefix: &str, file_name: &str) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix = random_suffix(8);
        let name = sanitize_file_name(file_name);
        let prefix = prefix.trim_matches('/');

        if prefix.is_empty() {
            format!("{}-{}-{}", millis, suffix, name)
        } else {
            format!("{}/{}-{}-{}", prefix, millis, suffix, name)
        }
    }

    fn chunk_path(&self, path: &str, index: u32) -> String {
        format!("{}.chunk.{}", path, index)
    }
}

/// Lowercase alphanumeric suffix used to disambiguate same-millisecond names
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

/// Reduce a user supplied file name to a path-safe segment.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
