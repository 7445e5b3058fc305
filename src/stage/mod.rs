//! The work done on a block at each pipeline stage.

use futures_util::future::BoxFuture;
use std::io;
use tokio::sync::mpsc;

use crate::{Error, Result};
use crate::queue::Ticket;
use crate::types::{Block, BlockInfo};

mod hash;
mod read;
mod upload;

pub use hash::HashStage;
pub use read::ReadStage;
pub use upload::UploadStage;

/// A task factory: turns one block into a future producing the next form
/// of that block. Dropping the future cancels the task.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, block: Block, progress: Progress) -> BoxFuture<'static, Result<Block>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Source,
    Read,
    Hash,
    Upload,
    Drain,
}

impl Level {
    pub fn upstream(self) -> Self {
        match self {
            Level::Source | Level::Read => Level::Source,
            Level::Hash => Level::Read,
            Level::Upload => Level::Hash,
            Level::Drain => Level::Upload,
        }
    }

    pub fn downstream(self) -> Self {
        match self {
            Level::Source => Level::Read,
            Level::Read => Level::Hash,
            Level::Hash => Level::Upload,
            Level::Upload | Level::Drain => Level::Drain,
        }
    }
}

/// Messages from running tasks back to the pipeline.
#[derive(Debug)]
pub(crate) enum Event {
    Progress {
        level: Level,
        ticket: Ticket,
        info: BlockInfo,
        bytes_sent: u64,
    },
    Finished {
        level: Level,
        ticket: Ticket,
        result: Result<Block>,
    },
}

/// Lets a task report partial progress on its block.
#[derive(Debug, Clone)]
pub struct Progress {
    pub(crate) events: Option<mpsc::UnboundedSender<Event>>,
    pub(crate) level: Level,
    pub(crate) ticket: Ticket,
}

impl Progress {
    pub(crate) fn new(events: mpsc::UnboundedSender<Event>, level: Level, ticket: Ticket) -> Self {
        Self {
            events: Some(events),
            level,
            ticket,
        }
    }

    /// A sink that drops every report.
    pub fn detached() -> Self {
        Self {
            events: None,
            level: Level::Source,
            ticket: 0,
        }
    }

    pub fn report(&self, info: &BlockInfo, bytes_sent: u64) {
        if let Some(events) = &self.events {
            let _ = events.send(Event::Progress {
                level: self.level,
                ticket: self.ticket,
                info: info.clone(),
                bytes_sent,
            });
        }
    }
}

/// A block arrived at a stage without the field an earlier stage fills in.
pub(crate) fn missing(field: &str) -> Error {
    Error::IoError(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("block reached this stage without {field}"),
    ))
}
