//! Back-pressured block upload pipeline.
//!
//! Files are split into fixed-size blocks which flow through a chain of
//! bounded stages: read, hash, upload. Each stage runs one task at a time
//! and buffers a fixed number of results, so memory use stays bounded no
//! matter how many files are queued. Before sending a block the uploader
//! asks the server whether it already stores that content, and skips the
//! transfer if so.

pub mod config;
pub mod endpoint;
mod error;
pub mod fs;
pub mod hash;
pub mod pipeline;
pub mod queue;
pub mod source;
pub mod stage;
pub mod types;
pub mod worker;

pub use config::{HashMode, PipelineConfig, RetryPolicy};
pub use endpoint::{BlockEndpoint, BlockRequest, HttpEndpoint, TransferStatus};
pub use error::{Error, Result};
pub use hash::HashAlgorithm;
pub use pipeline::{Pipeline, PipelineHandle, PipelineObserver, PipelineReport};
pub use types::{Block, BlockInfo, FileEntry, FileId};
