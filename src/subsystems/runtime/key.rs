//! Cache key derivation.
//!
//! A key captures what changes the *shape* of a backend: provider family,
//! endpoint and storage directory.  The API key, model, temperature, persona
//! and mode are absent; they travel per call, so rotating a
//! credential or toggling fallback never forces a rebuild.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::{AppConfig, ProviderFamily, expand_home};

/// Identity of one runtime bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    family: ProviderFamily,
    endpoint: String,
    data_dir: PathBuf,
}

impl CacheKey {
    pub fn family(&self) -> ProviderFamily {
        self.family
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Normalized storage directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Short stable hex digest, for logs and error messages.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.family.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.endpoint.as_bytes());
        hasher.update([0]);
        hasher.update(self.data_dir.to_string_lossy().as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

/// Derive the key for `config` stored under `data_dir`.  Pure and total.
pub fn build_key(config: &AppConfig, data_dir: &Path) -> CacheKey {
    let family = config.provider.family;
    let endpoint = match family {
        ProviderFamily::Dummy => String::new(),
        ProviderFamily::OpenAi | ProviderFamily::Xai => config.provider.endpoint(),
    };
    CacheKey { family, endpoint, data_dir: normalize_dir(data_dir) }
}

/// Expand `~`, make absolute against the working directory, and fold `.` /
/// `..` lexically.  Does not touch the filesystem, so symlinks are kept.
pub fn normalize_dir(path: &Path) -> PathBuf {
    let expanded = match path.to_str() {
        Some(s) => expand_home(s),
        None => path.to_path_buf(),
    };
    let absolute = std::path::absolute(&expanded).unwrap_or(expanded);

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
