//! Document links for citations.
//!
//! A public object store serves `{root}/{public_prefix}/{bucket}/{object_path}`.
//! Building that URL is pure string formatting; nothing checks that the
//! object exists. When no store is configured the caller falls back to a
//! local link built from the document's base filename.

use crate::config::{Secrets, StorageConfig};

#[derive(Debug, Clone, Default)]
pub struct LinkResolver {
    root: Option<String>,
    public_prefix: String,
    bucket_override: Option<String>,
    local_prefix: String,
}

impl LinkResolver {
    /// `[storage].public_url` wins over `SUPABASE_URL`.
    pub fn from_config(config: &StorageConfig, secrets: &Secrets) -> Self {
        let root = config
            .public_url
            .clone()
            .or_else(|| secrets.supabase_url.clone())
            .map(|r| r.trim().trim_end_matches('/').to_string())
            .filter(|r| !r.is_empty());

        Self {
            root,
            public_prefix: config.public_prefix.trim_matches('/').to_string(),
            bucket_override: config
                .bucket_override
                .clone()
                .filter(|b| !b.trim().is_empty()),
            local_prefix: config.local_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.root.is_some()
    }

    /// Public URL for an object, or `None` if it cannot be formed.
    pub fn resolve(&self, bucket: &str, object_path: &str) -> Option<String> {
        let root = self.root.as_deref()?;
        let bucket = self.bucket_override.as_deref().unwrap_or(bucket).trim_matches('/');
        let object_path = object_path.trim_start_matches('/');
        if bucket.is_empty() || object_path.is_empty() {
            return None;
        }

        let mut url = String::from(root);
        for segment in [self.public_prefix.as_str(), bucket, object_path] {
            if segment.is_empty() {
                continue;
            }
            url.push('/');
            url.push_str(segment);
        }
        Some(url)
    }

    /// Local link for a display filename: `{local_prefix}/{basename}`.
    pub fn local_link(&self, filename: &str) -> String {
        let base = basename(filename);
        if self.local_prefix.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", self.local_prefix, base)
        }
    }
}

/// Last path component of a display filename, accepting `/` and `\`.
/// Falls back to `document` for an empty name.
pub fn basename(filename: &str) -> &str {
    let trimmed = filename.trim_end_matches(['/', '\\']);
    let base = trimmed.rsplit(['/', '\\']).next().unwrap_or("");
    if base.is_empty() {
        "document"
    } else {
        base
    }
}
