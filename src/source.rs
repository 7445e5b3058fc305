use std::sync::Arc;

use crate::hash::HashAlgorithm;
use crate::types::{Block, BlockInfo, FileEntry, FileId};

/// 1 MB
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

struct SourceFile {
    id: FileId,
    entry: FileEntry,
    mime_type: Arc<str>,
    skipped: bool,
}

/// Splits registered files into blocks, in file order and then offset order.
pub struct BlockSource {
    block_size: u64,
    algorithm: HashAlgorithm,
    files: Vec<SourceFile>,
    current_file: usize,
    current_offset: u64,
}

impl BlockSource {
    pub fn new(block_size: u64, algorithm: HashAlgorithm) -> Self {
        assert!(block_size > 0, "block size must be positive");

        Self {
            block_size,
            algorithm,
            files: Vec::new(),
            current_file: 0,
            current_offset: 0,
        }
    }

    /// Registers a file and returns its id.
    pub fn push(&mut self, entry: FileEntry) -> FileId {
        let id = FileId::from_name(&entry.name, self.algorithm);
        let mime_type = entry.mime_type.as_str().into();

        self.files.push(SourceFile {
            id: id.clone(),
            entry,
            mime_type,
            skipped: false,
        });

        id
    }

    /// True if no registered file has unread bytes left.
    pub fn is_empty(&self) -> bool {
        self.files[self.current_file.min(self.files.len())..]
            .iter()
            .all(|file| file.skipped)
    }

    /// True when the consumer should be told that data is available.
    pub fn want_data(&self) -> bool {
        !self.is_empty()
    }

    /// The next block to read, or `None` once every file is exhausted.
    pub fn pop(&mut self) -> Option<Block> {
        while self
            .files
            .get(self.current_file)
            .is_some_and(|file| file.skipped)
        {
            self.advance_file();
        }

        let file = self.files.get(self.current_file)?;
        let file_size = file.entry.size();
        let bytes_left = file_size.saturating_sub(self.current_offset);
        let length = if file.entry.handle.supports_ranges() {
            self.block_size.min(bytes_left)
        } else {
            bytes_left
        };
        let start = self.current_offset;
        let last = start + length >= file_size;

        let block = Block {
            info: BlockInfo {
                file_id: file.id.clone(),
                start,
                length,
                last,
                file_size,
            },
            mime_type: file.mime_type.clone(),
            handle: file.entry.handle.clone(),
            data: None,
            hash: None,
            deduplicated: false,
        };

        if last {
            self.advance_file();
        } else {
            self.current_offset += length;
        }

        tracing::trace!(file_id = %block.info.file_id, start, length, last, "block sliced");
        Some(block)
    }

    /// Stops handing out blocks for `id`.
    pub fn skip_file(&mut self, id: &FileId) {
        let mut advance = false;
        for (index, file) in self.files.iter_mut().enumerate() {
            if &file.id == id && !file.skipped {
                file.skipped = true;
                advance |= index == self.current_file;
            }
        }

        if advance {
            self.advance_file();
        }
    }

    /// Forgets files that have no blocks left to hand out.
    pub fn prune(&mut self) {
        let done = self.current_file.min(self.files.len());
        self.files.drain(..done);
        self.files.retain(|file| !file.skipped);
        self.current_file = 0;
    }

    fn advance_file(&mut self) {
        self.current_file += 1;
        self.current_offset = 0;
    }
}
