//! Filesystem-backed blob store
//!
//! Temp uploads land under `<root>/tmp`, promoted receipts under
//! `<root>/receipts`. Promotion is a rename, so it stays cheap and atomic
//! on one filesystem.

use crate::error::IngestError;
use crate::Result;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{BlobStore, TempBlob};

pub struct FsBlobStore {
    temp_dir: PathBuf,
    permanent_dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            temp_dir: root.join("tmp"),
            permanent_dir: root.join("receipts"),
        }
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        tokio::fs::create_dir_all(&self.permanent_dir).await?;
        Ok(())
    }
}

/// Keep only characters safe for a filename; the original name is
/// untrusted input.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn write_temp(&self, bytes: &[u8], original_name: &str) -> Result<TempBlob> {
        self.ensure_dirs().await?;
        let id = Uuid::new_v4();
        let path = self.temp_dir.join(format!("{}_{}", id, sanitize(original_name)));
        tokio::fs::write(&path, bytes).await?;
        Ok(TempBlob {
            id,
            storage_ref: path.to_string_lossy().into_owned(),
        })
    }

    async fn promote(&self, temp_ref: &str, permanent_name: &str) -> Result<String> {
        self.ensure_dirs().await?;
        let destination = self.permanent_dir.join(sanitize(permanent_name));
        tokio::fs::rename(temp_ref, &destination)
            .await
            .map_err(|e| {
                IngestError::FileMove(format!("rename {} failed: {}", temp_ref, e))
            })?;
        Ok(destination.to_string_lossy().into_owned())
    }

    async fn delete(&self, storage_ref: &str) -> Result<()> {
        tokio::fs::remove_file(storage_ref).await?;
        Ok(())
    }
}
