//! GGUF upload verification
//!
//! Checks that a user-selected file set is a GGUF container before it is
//! admitted to the catalog. Only the first four bytes of the first file are
//! read, so multi-gigabyte uploads are never pulled into memory.

use crate::error::{ManagerError, ManagerResult};
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::io::AsyncReadExt;

/// Leading bytes of every GGUF file
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// `-00001-of-00003.gguf` style suffix used by split models
static SHARD_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-[0-9]{5}-of-[0-9]{5}\.[^.]+$").expect("valid shard suffix regex")
});

/// A file-like input: a named, sized blob that can be read from the start
#[async_trait]
pub trait ModelFile: Send + Sync + fmt::Debug {
    /// File name without directory
    fn name(&self) -> &str;

    /// Size in bytes
    fn size(&self) -> u64;

    /// Read up to `len` bytes from the start of the file
    async fn read_prefix(&self, len: usize) -> std::io::Result<Vec<u8>>;
}

/// Model file on local disk
#[derive(Debug, Clone)]
pub struct DiskFile {
    path: PathBuf,
    name: String,
    size: u64,
}

impl DiskFile {
    /// Stat a file on disk
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path,
            name,
            size: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ModelFile for DiskFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_prefix(&self, len: usize) -> std::io::Result<Vec<u8>> {
        let file = tokio::fs::File::open(&self.path).await?;
        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

/// Model file held in memory, e.g. an upload received over the wire
#[derive(Clone)]
pub struct MemoryFile {
    name: String,
    bytes: Arc<[u8]>,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for MemoryFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFile")
            .field("name", &self.name)
            .field("size", &self.bytes.len())
            .finish()
    }
}

#[async_trait]
impl ModelFile for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    async fn read_prefix(&self, len: usize) -> std::io::Result<Vec<u8>> {
        Ok(self.bytes[..len.min(self.bytes.len())].to_vec())
    }
}

/// Result of a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedFiles {
    /// First file name with any shard suffix removed
    pub base_name: String,
    /// Sum of all file sizes
    pub total_size: u64,
}

/// Remove a `-NNNNN-of-NNNNN.ext` shard suffix. Names without one are returned unchanged.
pub fn strip_shard_suffix(name: &str) -> &str {
    match SHARD_SUFFIX.find(name) {
        Some(m) => &name[..m.start()],
        None => name,
    }
}

/// Verify an ordered file selection is a GGUF model
pub async fn verify_files(files: &[Arc<dyn ModelFile>]) -> ManagerResult<VerifiedFiles> {
    let first = files.first().ok_or(ManagerError::EmptySelection)?;

    let head = first
        .read_prefix(GGUF_MAGIC.len())
        .await
        .map_err(|source| ManagerError::FileRead {
            name: first.name().to_string(),
            source,
        })?;

    if head != GGUF_MAGIC {
        tracing::debug!(file = %first.name(), head = ?head, "Rejected file without GGUF magic");
        return Err(ManagerError::InvalidFormat {
            name: first.name().to_string(),
        });
    }

    let total_size = files.iter().map(|f| f.size()).sum();
    let base_name = strip_shard_suffix(first.name()).to_string();

    tracing::debug!(
        base_name = %base_name,
        total_size = total_size,
        files = files.len(),
        "Verified GGUF file selection"
    );

    Ok(VerifiedFiles {
        base_name,
        total_size,
    })
}
