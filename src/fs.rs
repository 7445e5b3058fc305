use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// The byte source behind a selected file.
///
/// Hosts that cannot read an arbitrary byte range report
/// `supports_ranges() == false`; the block source then hands out the whole
/// remainder of the file as a single block.
pub trait BlobHandle: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn supports_ranges(&self) -> bool {
        true
    }

    /// Reads exactly `len` bytes starting at `start`.
    fn read_range(&self, start: u64, len: u64) -> BoxFuture<'_, io::Result<Bytes>>;
}

/// A file on the local disk, read lazily one range at a time.
#[derive(Debug, Clone)]
pub struct DiskFile {
    path: PathBuf,
    len: u64,
}

impl DiskFile {
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(&path).await?;
        if metadata.is_dir() {
            return Err(io::Error::from(io::ErrorKind::IsADirectory));
        }

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            len: metadata.len(),
        })
    }
}

impl BlobHandle for DiskFile {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, start: u64, len: u64) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(async move {
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(SeekFrom::Start(start)).await?;

            let mut buf = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
            let amount = file.take(len).read_to_end(&mut buf).await?;

            // The file shrank since it was selected
            if (amount as u64) < len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{}: expected {len} bytes at offset {start}, read {amount}",
                        self.path.display()
                    ),
                ));
            }

            Ok(Bytes::from(buf))
        })
    }
}

/// Bytes already in memory.
#[derive(Debug, Clone)]
pub struct MemoryBlob {
    data: Bytes,
    ranges: bool,
}

impl MemoryBlob {
    pub fn new<B: Into<Bytes>>(data: B) -> Self {
        Self {
            data: data.into(),
            ranges: true,
        }
    }

    /// Behave like a host without byte-range support.
    pub fn without_ranges(mut self) -> Self {
        self.ranges = false;
        self
    }
}

impl BlobHandle for MemoryBlob {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn supports_ranges(&self) -> bool {
        self.ranges
    }

    fn read_range(&self, start: u64, len: u64) -> BoxFuture<'_, io::Result<Bytes>> {
        let end = start.checked_add(len).filter(|end| *end <= self.len());
        let result = match end {
            Some(end) => Ok(self.data.slice(start as usize..end as usize)),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {start}+{len} outside blob of {} bytes", self.len()),
            )),
        };

        Box::pin(std::future::ready(result))
    }
}
