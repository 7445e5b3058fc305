//! Bounded result pool plus single-task runner that sits between two stages.
//!
//! A `StageQueue` never talks to its neighbours directly. Every operation
//! returns the [`Signals`] it wants delivered: `want_upstream` is the
//! "I have room, give me more" demand sent to the source, `data_ready` is the
//! "results are waiting" notification sent to the consumer. The pipeline
//! routes them.

use std::collections::VecDeque;
use tokio::task::AbortHandle;

use crate::types::{Block, FileId};

pub type Ticket = u64;

/// Items that belong to one file.
pub trait FileScoped {
    fn file_id(&self) -> &FileId;
}

impl FileScoped for Block {
    fn file_id(&self) -> &FileId {
        &self.info.file_id
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Signals {
    pub want_upstream: bool,
    pub data_ready: bool,
}

#[derive(Debug)]
struct PendingTask {
    ticket: Ticket,
    file_id: FileId,
    abort: Option<AbortHandle>,
}

#[derive(Debug)]
pub struct StageQueue<T> {
    name: &'static str,
    pool: VecDeque<T>,
    pool_size: usize,
    pending: Option<PendingTask>,
    next_ticket: Ticket,
}

impl<T: FileScoped> StageQueue<T> {
    pub fn new(name: &'static str, pool_size: usize) -> Self {
        Self {
            name,
            pool: VecDeque::with_capacity(pool_size),
            pool_size: pool_size.max(1),
            pending: None,
            next_ticket: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// True if there is nothing currently available to pop.
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// True if there is no room for another result.
    pub fn is_full(&self) -> bool {
        self.pool.len() >= self.pool_size
    }

    /// True if no task is running.
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.pending.as_ref().is_some_and(|task| task.ticket == ticket)
    }

    /// Removes the oldest result.
    pub fn pop(&mut self) -> (Option<T>, Signals) {
        let item = self.pool.pop_front();
        let signals = Signals {
            want_upstream: !self.is_full(),
            data_ready: false,
        };

        (item, signals)
    }

    /// The source has data. Starts a task on one pulled item unless a task
    /// is already running or the pool is full.
    pub fn on_source_data<I: FileScoped>(
        &mut self,
        pull: impl FnOnce() -> Option<I>,
    ) -> Option<(Ticket, I)> {
        if self.pending.is_some() || self.is_full() {
            return None;
        }

        let item = pull()?;
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending = Some(PendingTask {
            ticket,
            file_id: item.file_id().clone(),
            abort: None,
        });

        Some((ticket, item))
    }

    /// Hooks up the handle used to abort the running task.
    pub fn attach(&mut self, ticket: Ticket, abort: AbortHandle) {
        match &mut self.pending {
            Some(task) if task.ticket == ticket => task.abort = Some(abort),
            _ => abort.abort(),
        }
    }

    /// Records a task result. Returns `None` for a task that is no longer
    /// current, which makes late completions of cancelled tasks a no-op.
    pub fn finish(&mut self, ticket: Ticket, result: Option<T>) -> Option<(FileId, Signals)> {
        if !self.is_current(ticket) {
            return None;
        }
        let task = self.pending.take()?;

        let data_ready = result.is_some();
        if let Some(result) = result {
            self.pool.push_back(result);
        }

        let signals = Signals {
            want_upstream: !self.is_full(),
            data_ready,
        };

        Some((task.file_id, signals))
    }

    /// A consumer wants to pop.
    pub fn want_data(&self) -> Signals {
        if !self.is_empty() {
            return Signals {
                want_upstream: false,
                data_ready: true,
            };
        }

        Signals {
            want_upstream: self.pending.is_none() && !self.is_full(),
            data_ready: false,
        }
    }

    /// Drops everything belonging to `file_id`, aborting its running task.
    pub fn cancel_file(&mut self, file_id: &FileId) -> Signals {
        let before = self.pool.len();
        self.pool.retain(|item| item.file_id() != file_id);
        let mut changed = self.pool.len() != before;

        if self
            .pending
            .as_ref()
            .is_some_and(|task| &task.file_id == file_id)
        {
            if let Some(abort) = self.pending.take().and_then(|task| task.abort) {
                abort.abort();
            }
            changed = true;
        }

        Signals {
            want_upstream: changed && self.pending.is_none() && !self.is_full(),
            data_ready: false,
        }
    }
}
