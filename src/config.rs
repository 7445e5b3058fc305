use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::hash::HashAlgorithm;
use crate::source::DEFAULT_BLOCK_SIZE;
use crate::{Error, Result};

/// Where block hashing runs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMode {
    /// On the pipeline's own task.
    #[default]
    Inline,
    /// On a dedicated background thread.
    Worker,
}

/// Bounded exponential backoff for transfers the server rejected as corrupt.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Upload endpoint for both the existence check and the transfer.
    pub endpoint: String,
    pub block_size: u64,
    pub read_pool_size: usize,
    pub hash_pool_size: usize,
    pub upload_pool_size: usize,
    pub hash_algorithm: HashAlgorithm,
    pub hash_mode: HashMode,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            read_pool_size: 5,
            hash_pool_size: 5,
            upload_pool_size: 1,
            hash_algorithm: HashAlgorithm::default(),
            hash_mode: HashMode::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_pool_sizes(mut self, read: usize, hash: usize, upload: usize) -> Self {
        self.read_pool_size = read;
        self.hash_pool_size = hash;
        self.upload_pool_size = upload;
        self
    }

    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    pub fn with_hash_mode(mut self, mode: HashMode) -> Self {
        self.hash_mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::ConfigError("block_size must be positive".into()));
        }
        if self.read_pool_size == 0 || self.hash_pool_size == 0 || self.upload_pool_size == 0 {
            return Err(Error::ConfigError("pool sizes must be positive".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::ConfigError(
                "retry base_delay_ms exceeds max_delay_ms".into(),
            ));
        }

        Ok(())
    }
}
