use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::RuntimeError;

/// Where a resource archive comes from.
///
/// `location` is either an `http(s)://` URL or a filesystem path; relative
/// paths are resolved against the directory the config was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceSource {
    pub location: String,
    /// Optional SHA-256 hex digest the fetched bytes must match.
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ResourceSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            sha256: None,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }

    /// Fetch the resource bytes and verify the digest if one is pinned.
    pub async fn fetch(&self, base_dir: Option<&Path>) -> Result<Vec<u8>, RuntimeError> {
        let bytes = if self.is_remote() {
            tracing::info!(url = %self.location, "Fetching resource");
            let response = reqwest::get(&self.location).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(RuntimeError::FetchStatus {
                    location: self.location.clone(),
                    status: status.as_u16(),
                });
            }
            response.bytes().await?.to_vec()
        } else {
            let path = match base_dir {
                Some(base) => base.join(&self.location),
                None => Path::new(&self.location).to_path_buf(),
            };
            tracing::info!(path = %path.display(), "Reading resource");
            tokio::fs::read(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RuntimeError::NotFound(path.display().to_string())
                } else {
                    RuntimeError::Io(e)
                }
            })?
        };

        if let Some(expected) = &self.sha256 {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(RuntimeError::ChecksumMismatch {
                    location: self.location.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(bytes)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
