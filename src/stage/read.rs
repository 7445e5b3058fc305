use futures_util::future::BoxFuture;

use super::{Progress, Stage};
use crate::Result;
use crate::types::Block;

/// Loads a block's bytes into memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadStage;

impl Stage for ReadStage {
    fn name(&self) -> &'static str {
        "read"
    }

    fn run(&self, mut block: Block, _progress: Progress) -> BoxFuture<'static, Result<Block>> {
        Box::pin(async move {
            let data = block
                .handle
                .read_range(block.info.start, block.info.length)
                .await?;

            tracing::debug!(
                file_id = %block.info.file_id,
                start = block.info.start,
                len = data.len(),
                "block read"
            );
            block.data = Some(data);
            Ok(block)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::hash::HashAlgorithm;
    use crate::source::BlockSource;
    use crate::types::FileEntry;

    #[tokio::test]
    async fn test_read_fills_data() -> Result<()> {
        let mut source = BlockSource::new(4, HashAlgorithm::Blake3);
        source.push(FileEntry::from_bytes("a", "text/plain", &b"0123456789"[..]));
        source.pop();

        let block = source.pop().expect("second block");
        let block = ReadStage.run(block, Progress::detached()).await?;

        assert_eq!(block.data.as_deref(), Some(&b"4567"[..]));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_failure_is_reported() -> Result<()> {
        let file = temp_file::TempFile::new()?.with_contents(b"This is some test data.")?;
        let entry = FileEntry::open(file.path()).await?;
        let mut source = BlockSource::new(8, HashAlgorithm::Blake3);
        source.push(entry);
        let block = source.pop().expect("first block");

        // Truncate behind the pipeline's back.
        std::fs::write(file.path(), b"tiny")?;

        let result = ReadStage.run(block, Progress::detached()).await;
        assert!(matches!(result, Err(Error::IoError(_))));
        Ok(())
    }
}
