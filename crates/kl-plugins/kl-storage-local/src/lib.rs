//! # kl-storage-local
//! klutch/crates/kl-plugins/kl-storage-local/src/lib.rs
//! Local filesystem implementation of `MediaStore`.
//! Content-addressable: the same bytes uploaded twice to one posting land on one file.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use kl_core::error::{AppError, Result};
use kl_core::models::StoredUpload;
use kl_core::traits::MediaStore;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct LocalMediaStore {
    /// Root directory for all uploads (e.g., "./data/media")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/media")
    url_prefix: String,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root_path: root.into(),
            url_prefix: url_prefix.into(),
        }
    }
}

/// Scopes become a directory name, so only plain identifiers are allowed.
fn check_scope(scope: &str) -> Result<()> {
    let ok = !scope.is_empty()
        && scope
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(AppError::StorageError(format!("invalid storage scope {scope:?}")))
    }
}

/// Extension from the client's file name when it looks sane, else from the content type.
fn extension_for(file_name: &str, content_type: &mime::Mime) -> String {
    let from_name = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    if let Some(ext) = from_name {
        return ext;
    }
    mime_guess::get_mime_extensions(content_type)
        .and_then(|exts| exts.first())
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| "bin".to_string())
}

/// Keys are produced by `save_upload`; anything that could climb out of the root is refused.
fn check_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && !key.starts_with('/')
        && key.split('/').all(|part| !part.is_empty() && part != "." && part != "..");
    if ok {
        Ok(())
    } else {
        Err(AppError::StorageError(format!("invalid storage key {key:?}")))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    /// Saves an upload as `postings/<scope>/<sha256>.<ext>` and returns that key.
    ///
    /// The file is opened with `create_new`, so when identical bytes race only
    /// one caller reports `created`.
    async fn save_upload(
        &self,
        scope: &str,
        file_name: &str,
        data: Bytes,
        content_type: &mime::Mime,
    ) -> Result<StoredUpload> {
        check_scope(scope)?;

        let hash = hex::encode(Sha256::digest(&data));
        let key = format!("postings/{scope}/{hash}.{}", extension_for(file_name, content_type));
        let target_path = self.root_path.join(&key);

        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::StorageError(format!("create {}: {e}", parent.display())))?;
        }

        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&target_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(%key, "identical upload already stored");
                return Ok(StoredUpload { key, created: false });
            }
            Err(e) => return Err(AppError::StorageError(format!("open {}: {e}", target_path.display()))),
        };

        let written = async {
            file.write_all(&data).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&target_path).await;
            return Err(AppError::StorageError(format!("write {}: {e}", target_path.display())));
        }

        debug!(%key, bytes = data.len(), "upload stored");
        Ok(StoredUpload { key, created: true })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        check_key(key)?;
        match fs::remove_file(self.root_path.join(key)).await {
            Ok(()) => {
                debug!(%key, "upload removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::StorageError(format!("remove {key}: {e}"))),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix.trim_end_matches('/'), key)
    }
}
