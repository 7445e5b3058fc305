use bytes::Bytes;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::fs::{BlobHandle, DiskFile, MemoryBlob};
use crate::hash::HashAlgorithm;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Stable identifier of a file: the hex digest of its name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(Arc<str>);

impl FileId {
    pub fn from_name(name: &str, algorithm: HashAlgorithm) -> Self {
        Self(algorithm.hash_hex(name.as_bytes()).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One user-selected file.
#[derive(Clone)]
pub struct FileEntry {
    pub name: String,
    pub mime_type: String,
    pub handle: Arc<dyn BlobHandle>,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, handle: Arc<dyn BlobHandle>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            handle,
        }
    }

    /// A disk-backed entry named after the file's last path component.
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let name = path
            .as_ref()
            .file_name()
            .ok_or(io::Error::from(io::ErrorKind::IsADirectory))?
            .to_string_lossy()
            .into_owned();
        let handle = DiskFile::open(path).await?;

        Ok(Self::new(name, DEFAULT_MIME_TYPE, Arc::new(handle)))
    }

    pub fn from_bytes<B: Into<Bytes>>(name: impl Into<String>, mime_type: impl Into<String>, data: B) -> Self {
        Self::new(name, mime_type, Arc::new(MemoryBlob::new(data)))
    }

    pub fn size(&self) -> u64 {
        self.handle.len()
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// The identity of a block, safe to hand to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub file_id: FileId,
    pub start: u64,
    pub length: u64,
    pub last: bool,
    pub file_size: u64,
}

impl BlockInfo {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// A contiguous byte range of one file, flowing through the pipeline.
///
/// `data` is filled in by the reader stage and `hash` by the hasher stage.
/// `deduplicated` is set by the uploader when the server already had it.
#[derive(Clone)]
pub struct Block {
    pub info: BlockInfo,
    pub mime_type: Arc<str>,
    pub(crate) handle: Arc<dyn BlobHandle>,
    pub data: Option<Bytes>,
    pub hash: Option<String>,
    pub deduplicated: bool,
}

impl Block {
    pub fn file_id(&self) -> &FileId {
        &self.info.file_id
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("info", &self.info)
            .field("mime_type", &self.mime_type)
            .field("data", &self.data.as_ref().map(Bytes::len))
            .field("hash", &self.hash)
            .field("deduplicated", &self.deduplicated)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_stability() {
        let id = FileId::from_name("photo.jpg", HashAlgorithm::Sha256);

        assert_eq!(id, FileId::from_name("photo.jpg", HashAlgorithm::Sha256));
        assert_ne!(id, FileId::from_name("photo.png", HashAlgorithm::Sha256));
        assert_eq!(id.as_str(), HashAlgorithm::Sha256.hash_hex(b"photo.jpg"));
    }

    #[tokio::test]
    async fn test_open_entry() -> io::Result<()> {
        let file = temp_file::TempFile::new()?.with_contents(b"This is some test data.")?;
        let entry = FileEntry::open(file.path()).await?;

        assert_eq!(entry.size(), 23);
        assert_eq!(entry.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(
            entry.name,
            file.path().file_name().unwrap().to_string_lossy()
        );

        Ok(())
    }
}
