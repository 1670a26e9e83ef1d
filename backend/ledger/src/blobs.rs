//! Content-addressed storage for proof bytes.
//!
//! Each blob is written to `<root>/<sha256-hex>`. Writing the same content
//! twice is a no-op, so a blob written ahead of an aborted transaction is at
//! worst an unreferenced file, never a reference to missing bytes.

use std::io::Write;
use std::path::{Path, PathBuf};

use earmark_protocol::content_hash;
use tokio::fs;
use tracing::debug;

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

/// Reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub hash: String,
    pub path: PathBuf,
}

impl BlobStore {
    /// Open the blob area, creating the directory if needed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    /// Store `bytes` under their SHA-256 and return the reference.
    pub async fn put(&self, bytes: &[u8]) -> Result<StoredBlob> {
        let hash = content_hash(bytes);
        let path = self.path_for(&hash);

        if fs::try_exists(&path).await? {
            debug!("Blob {hash} already present");
            return Ok(StoredBlob { hash, path });
        }

        // Write to a uniquely named temp file, then rename: the final name
        // never holds a partial blob, and concurrent writers never share a
        // temp file.
        let root = self.root.clone();
        let dest = path.clone();
        let data = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&root)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&dest).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;
        debug!("Stored blob {hash} ({} bytes)", bytes.len());

        Ok(StoredBlob { hash, path })
    }

    pub async fn get(&self, hash: &str) -> Result<Vec<u8>> {
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(LedgerError::Corrupt(format!("not a content hash: {hash:?}")));
        }
        Ok(fs::read(self.path_for(hash)).await?)
    }

    /// Recompute the hash of the stored bytes and compare it with `hash`.
    pub async fn verify(&self, hash: &str) -> Result<bool> {
        let bytes = self.get(hash).await?;
        Ok(content_hash(&bytes) == hash)
    }
}
