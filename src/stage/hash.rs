use futures_util::future::BoxFuture;

use super::{Progress, Stage, missing};
use crate::Result;
use crate::hash::HashAlgorithm;
use crate::types::Block;
use crate::worker::HashWorker;

/// Computes the content digest of a block that has been read.
///
/// With a worker the digest is computed off the pipeline's thread; dropping
/// the task only discards the result, the worker still finishes the job.
#[derive(Debug, Clone)]
pub struct HashStage {
    algorithm: HashAlgorithm,
    worker: Option<HashWorker>,
}

impl HashStage {
    pub fn inline(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            worker: None,
        }
    }

    pub fn with_worker(algorithm: HashAlgorithm, worker: HashWorker) -> Self {
        Self {
            algorithm,
            worker: Some(worker),
        }
    }
}

impl Stage for HashStage {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn run(&self, mut block: Block, _progress: Progress) -> BoxFuture<'static, Result<Block>> {
        let algorithm = self.algorithm;
        let worker = self.worker.clone();

        Box::pin(async move {
            let data = block.data.clone().ok_or_else(|| missing("data"))?;

            let hash = match worker {
                Some(worker) => worker.hash(algorithm, data).await?,
                None => algorithm.hash_hex(&data),
            };

            tracing::debug!(file_id = %block.info.file_id, start = block.info.start, %hash, "block hashed");
            block.hash = Some(hash);
            Ok(block)
        })
    }
}
