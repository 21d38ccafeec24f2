use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use super::{AssetStore, ExternalError};
use crate::models::AssetRef;

const SCHEME: &str = "local:";

/// Content-addressed asset store on the local filesystem.
///
/// Files are named by the SHA-256 of their content, so storing the same
/// upload twice yields the same reference.
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, asset: &AssetRef) -> Result<PathBuf, ExternalError> {
        let name = asset
            .as_str()
            .strip_prefix(SCHEME)
            .ok_or_else(|| ExternalError::Permanent(format!("Not a local asset: {asset}")))?;

        // Only names we generated: hex digest plus an optional extension
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.')
            && !name.starts_with('.');
        if !valid {
            return Err(ExternalError::Permanent(format!("Invalid asset name: {name}")));
        }
        Ok(self.root.join(name))
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn put(&self, filename: &str, data: Bytes) -> Result<AssetRef, ExternalError> {
        let digest = hex::encode(Sha256::digest(&data));
        let name = match extension_of(filename) {
            Some(ext) => format!("{digest}.{ext}"),
            None => digest,
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ExternalError::Transient(format!("Cannot create asset dir: {e}")))?;

        let path = self.root.join(&name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!("Asset {name} already stored");
        } else {
            // Write to a temp name first so a crash never leaves a truncated asset
            let tmp = self.root.join(format!("{name}.partial"));
            tokio::fs::write(&tmp, &data)
                .await
                .map_err(|e| ExternalError::Transient(format!("Cannot write asset: {e}")))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| ExternalError::Transient(format!("Cannot finalize asset: {e}")))?;
            tracing::info!("Stored asset '{filename}' as {name} ({} bytes)", data.len());
        }

        Ok(AssetRef(format!("{SCHEME}{name}")))
    }

    async fn fetch(&self, asset: &AssetRef) -> Result<Bytes, ExternalError> {
        let path = self.path_for(asset)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ExternalError::Permanent(format!("Asset {asset} is missing")))
            }
            Err(e) => Err(ExternalError::Transient(format!("Cannot read asset {asset}: {e}"))),
        }
    }
}
