use futures_util::future::BoxFuture;
use std::sync::Arc;

use super::{Progress, Stage, missing};
use crate::config::RetryPolicy;
use crate::endpoint::{BlockEndpoint, BlockRequest, TransferStatus};
use crate::types::Block;
use crate::{Error, Result};

/// Sends a hashed block to the server unless the server already has it.
///
/// A transfer the server rejects as corrupt (HTTP 400) is retried with
/// backoff; the existence check is never repeated.
#[derive(Clone)]
pub struct UploadStage {
    endpoint: Arc<dyn BlockEndpoint>,
    retry: RetryPolicy,
}

impl UploadStage {
    pub fn new(endpoint: Arc<dyn BlockEndpoint>, retry: RetryPolicy) -> Self {
        Self { endpoint, retry }
    }
}

impl Stage for UploadStage {
    fn name(&self) -> &'static str {
        "upload"
    }

    fn run(&self, mut block: Block, progress: Progress) -> BoxFuture<'static, Result<Block>> {
        let endpoint = self.endpoint.clone();
        let retry = self.retry.clone();

        Box::pin(async move {
            let hash = block.hash.clone().ok_or_else(|| missing("hash"))?;
            let data = block.data.clone().ok_or_else(|| missing("data"))?;
            let request = BlockRequest::for_block(&block, &hash);

            if endpoint.check(&request).await? {
                tracing::debug!(file_id = %request.file_id, start = request.start, "block already stored");
                block.deduplicated = true;
                progress.report(&block.info, block.info.length);
                return Ok(block);
            }

            let mut attempts = 0;
            loop {
                attempts += 1;
                match endpoint.transfer(&request, data.clone()).await? {
                    TransferStatus::Accepted => break,
                    TransferStatus::Corrupted if attempts > retry.max_retries => {
                        return Err(Error::RetriesExhausted { attempts });
                    }
                    TransferStatus::Corrupted => {
                        let delay = retry.delay(attempts - 1);
                        tracing::warn!(
                            file_id = %request.file_id,
                            start = request.start,
                            attempts,
                            ?delay,
                            "block corrupted in transit, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }

            tracing::debug!(file_id = %request.file_id, start = request.start, attempts, "block uploaded");
            progress.report(&block.info, data.len() as u64);
            Ok(block)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use crate::source::BlockSource;
    use crate::stage::{HashStage, Level, ReadStage};
    use crate::types::FileEntry;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers transfers from a script; `Err` entries become server errors.
    struct ScriptedEndpoint {
        present: bool,
        transfers: Mutex<VecDeque<std::result::Result<TransferStatus, StatusCode>>>,
        checks: AtomicUsize,
        sent: AtomicUsize,
    }

    impl ScriptedEndpoint {
        fn new(present: bool, transfers: Vec<std::result::Result<TransferStatus, StatusCode>>) -> Arc<Self> {
            Arc::new(Self {
                present,
                transfers: Mutex::new(transfers.into()),
                checks: AtomicUsize::new(0),
                sent: AtomicUsize::new(0),
            })
        }
    }

    impl BlockEndpoint for ScriptedEndpoint {
        fn check<'a>(&'a self, _block: &'a BlockRequest) -> BoxFuture<'a, Result<bool>> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Box::pin(std::future::ready(Ok(self.present)))
        }

        fn transfer<'a>(&'a self, _block: &'a BlockRequest, _data: Bytes) -> BoxFuture<'a, Result<TransferStatus>> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            let next = self
                .transfers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(TransferStatus::Accepted));
            Box::pin(std::future::ready(
                next.map_err(|status| Error::server(status, "block transfer")),
            ))
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    async fn hashed_block() -> Result<Block> {
        let mut source = BlockSource::new(1024, HashAlgorithm::Blake3);
        source.push(FileEntry::from_bytes("a", "text/plain", &b"This is some test data."[..]));
        let block = source.pop().expect("one block");
        let block = ReadStage.run(block, Progress::detached()).await?;
        HashStage::inline(HashAlgorithm::Blake3)
            .run(block, Progress::detached())
            .await
    }

    #[tokio::test]
    async fn test_retries_corrupt_transfer_without_rechecking() -> Result<()> {
        let endpoint = ScriptedEndpoint::new(
            false,
            vec![
                Ok(TransferStatus::Corrupted),
                Ok(TransferStatus::Corrupted),
                Ok(TransferStatus::Accepted),
            ],
        );
        let (events, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let stage = UploadStage::new(endpoint.clone(), fast_retry(5));

        let block = stage.run(hashed_block().await?, Progress::new(events, Level::Upload, 7)).await?;

        assert!(!block.deduplicated);
        assert_eq!(endpoint.checks.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.sent.load(Ordering::SeqCst), 3);

        // Exactly one progress report, for the whole block.
        let mut reports = Vec::new();
        while let Ok(event) = rx.try_recv() {
            reports.push(event);
        }
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            &reports[0],
            crate::stage::Event::Progress { ticket: 7, bytes_sent: 23, .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_present_block_skips_transfer() -> Result<()> {
        let endpoint = ScriptedEndpoint::new(true, Vec::new());
        let stage = UploadStage::new(endpoint.clone(), fast_retry(5));

        let block = stage.run(hashed_block().await?, Progress::detached()).await?;

        assert!(block.deduplicated);
        assert_eq!(endpoint.sent.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_retries_are_bounded() -> Result<()> {
        let endpoint = ScriptedEndpoint::new(false, vec![Ok(TransferStatus::Corrupted); 10]);
        let stage = UploadStage::new(endpoint.clone(), fast_retry(2));

        let err = stage
            .run(hashed_block().await?, Progress::detached())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { attempts: 3 }));
        assert_eq!(endpoint.sent.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() -> Result<()> {
        let endpoint = ScriptedEndpoint::new(false, vec![Err(StatusCode::FORBIDDEN)]);
        let stage = UploadStage::new(endpoint.clone(), fast_retry(5));

        let err = stage
            .run(hashed_block().await?, Progress::detached())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ServerError { .. }));
        assert_eq!(endpoint.sent.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
