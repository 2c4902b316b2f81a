use anyhow::Context;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Workspace-relative directory holding material files, named by SHA-256.
pub const BLOB_DIR: &str = "materials";

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub content_hash: String,
    pub stored_path: PathBuf,
    pub size_bytes: u64,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn blob_path(workspace: &Path, content_hash: &str) -> PathBuf {
    workspace.join(BLOB_DIR).join(content_hash)
}

/// Copies `source` into the store. Identical content is stored once.
pub fn store_file(workspace: &Path, source: &Path) -> anyhow::Result<StoredBlob> {
    let bytes = std::fs::read(source)
        .with_context(|| format!("failed to read {}", source.to_string_lossy()))?;
    let content_hash = sha256_hex(&bytes);
    let dir = workspace.join(BLOB_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.to_string_lossy()))?;

    let dst = dir.join(&content_hash);
    if !dst.is_file() {
        let tmp = dir.join(format!("{}.partial", content_hash));
        let mut f = std::fs::File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.to_string_lossy()))?;
        f.write_all(&bytes).context("failed to write material blob")?;
        f.flush().context("failed to flush material blob")?;
        drop(f);
        std::fs::rename(&tmp, &dst)
            .with_context(|| format!("failed to move blob into {}", dst.to_string_lossy()))?;
    }

    Ok(StoredBlob {
        content_hash,
        stored_path: dst,
        size_bytes: bytes.len() as u64,
    })
}

/// Returns whether a file was removed.
pub fn remove_blob(workspace: &Path, content_hash: &str) -> anyhow::Result<bool> {
    let p = blob_path(workspace, content_hash);
    if !p.is_file() {
        return Ok(false);
    }
    std::fs::remove_file(&p).with_context(|| format!("failed to remove {}", p.to_string_lossy()))?;
    Ok(true)
}
