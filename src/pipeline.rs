//! Wires the stages into a back-pressured chain and drives it to drain.
//!
//! ```text
//! BlockSource -> read queue -> hash queue -> upload queue -> drain
//! ```
//!
//! The pipeline is a single-writer event loop: queues, file bookkeeping and
//! the observer are only touched from `pipeline_files`. Tasks run on the
//! tokio runtime and report back over a channel, tagged with the ticket their
//! queue issued. A ticket that is no longer current belongs to a cancelled
//! task and its messages are dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{HashMode, PipelineConfig};
use crate::endpoint::{BlockEndpoint, HttpEndpoint};
use crate::queue::{Signals, StageQueue, Ticket};
use crate::source::BlockSource;
use crate::stage::{Event, HashStage, Level, Progress, ReadStage, Stage, UploadStage};
use crate::types::{Block, BlockInfo, FileEntry, FileId};
use crate::worker::HashWorker;
use crate::{Error, Result};

/// Callbacks invoked from the pipeline's event loop.
pub trait PipelineObserver: Send {
    /// `bytes_sent` of the block's bytes have reached the server.
    fn on_progress(&mut self, _block: &BlockInfo, _bytes_sent: u64) {}

    fn on_file_progress(&mut self, _file_id: &FileId, _uploaded: u64, _total: u64) {}

    fn on_file_complete(&mut self, _file_id: &FileId) {}

    fn on_file_failed(&mut self, _file_id: &FileId, _error: &str) {}

    fn on_file_cancelled(&mut self, _file_id: &FileId) {}

    /// Fires exactly once per `pipeline_files` call.
    fn on_drain(&mut self, _report: &PipelineReport) {}
}

impl PipelineObserver for () {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub completed: Vec<FileId>,
    pub failed: Vec<(FileId, String)>,
    pub cancelled: Vec<FileId>,
    /// Bytes the server now holds, whether transferred or deduplicated.
    pub bytes_uploaded: u64,
    pub blocks_transferred: u64,
    pub blocks_deduplicated: u64,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }
}

#[derive(Debug)]
enum Command {
    CancelFile(FileId),
}

/// Lets other tasks steer a running pipeline.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl PipelineHandle {
    /// Stops uploading `file_id`. Its in-flight block is abandoned and the
    /// file is reported as cancelled.
    pub fn cancel_file(&self, file_id: FileId) {
        let _ = self.commands.send(Command::CancelFile(file_id));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    Uploading,
    Complete,
    Failed,
    Cancelled,
}

#[derive(Debug)]
struct FileProgress {
    name: String,
    size: u64,
    uploaded: u64,
    state: FileState,
}

#[derive(Debug, Clone, Copy)]
enum Route {
    /// The consumer of `Level` wants data from it.
    WantData(Level),
    /// The source of `Level` has data available.
    SourceData(Level),
}

struct Stages {
    read: Arc<dyn Stage>,
    hash: Arc<dyn Stage>,
    upload: Arc<dyn Stage>,
}

pub struct Pipeline {
    config: PipelineConfig,
    endpoint: Arc<dyn BlockEndpoint>,
    worker: Option<HashWorker>,
    stages: Option<Stages>,
    observer: Box<dyn PipelineObserver>,

    source: BlockSource,
    read_q: StageQueue<Block>,
    hash_q: StageQueue<Block>,
    upload_q: StageQueue<Block>,

    routes: VecDeque<Route>,
    files: HashMap<FileId, FileProgress>,
    report: PipelineReport,

    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
}

impl Pipeline {
    /// A pipeline uploading to the HTTP endpoint named in `config`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let endpoint = HttpEndpoint::new(&config.endpoint)?;
        Self::with_endpoint(config, Arc::new(endpoint))
    }

    pub fn with_endpoint(config: PipelineConfig, endpoint: Arc<dyn BlockEndpoint>) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        Ok(Self {
            source: BlockSource::new(config.block_size, config.hash_algorithm),
            read_q: StageQueue::new("read", config.read_pool_size),
            hash_q: StageQueue::new("hash", config.hash_pool_size),
            upload_q: StageQueue::new("upload", config.upload_pool_size),
            config,
            endpoint,
            worker: None,
            stages: None,
            observer: Box::new(()),
            routes: VecDeque::new(),
            files: HashMap::new(),
            report: PipelineReport::default(),
            events_tx,
            events_rx,
            commands_tx,
            commands_rx,
        })
    }

    pub fn with_observer<O: PipelineObserver + 'static>(mut self, observer: O) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            commands: self.commands_tx.clone(),
        }
    }

    /// Uploads `files` and returns once every block has drained.
    ///
    /// Failed files are listed in the report; they never stall the others.
    pub async fn pipeline_files(&mut self, files: Vec<FileEntry>) -> Result<PipelineReport> {
        self.prepare_stages()?;
        self.report = PipelineReport::default();
        self.files.clear();
        self.source.prune();

        for entry in files {
            let name = entry.name.clone();
            let size = entry.size();
            let id = FileId::from_name(&name, self.config.hash_algorithm);

            // Same name, same id on the server.
            if self.files.contains_key(&id) {
                let message = Error::DuplicateFile(name).to_string();
                tracing::warn!(file_id = %id, error = %message, "file rejected");
                self.report.failed.push((id.clone(), message.clone()));
                self.observer.on_file_failed(&id, &message);
                continue;
            }

            self.source.push(entry);
            tracing::debug!(file_id = %id, %name, size, "file registered");
            self.files.insert(
                id,
                FileProgress {
                    name,
                    size,
                    uploaded: 0,
                    state: FileState::Uploading,
                },
            );
        }
        tracing::info!(
            files = self.files.len(),
            hash = self.config.hash_algorithm.name(),
            block_size = self.config.block_size,
            "pipeline started"
        );

        // Commands sent before the run apply to the files just registered.
        while let Ok(command) = self.commands_rx.try_recv() {
            self.on_command(command);
        }

        // The drain's first demand pulse starts the cascade.
        self.routes.push_back(Route::WantData(Level::Upload));

        loop {
            self.settle();
            if self.is_drained() {
                break;
            }
            if self.in_flight() == 0 {
                tracing::error!("pipeline stalled with no task in flight");
                self.fail_remaining("pipeline stalled");
                break;
            }

            tokio::select! {
                Some(event) = self.events_rx.recv() => self.on_event(event),
                Some(command) = self.commands_rx.recv() => self.on_command(command),
                else => break,
            }
        }

        self.source.prune();
        let report = std::mem::take(&mut self.report);
        tracing::info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            bytes = report.bytes_uploaded,
            "pipeline drained"
        );
        self.observer.on_drain(&report);

        Ok(report)
    }

    fn prepare_stages(&mut self) -> Result<()> {
        if self.stages.is_some() {
            return Ok(());
        }

        let algorithm = self.config.hash_algorithm;
        let hash = match self.config.hash_mode {
            HashMode::Inline => HashStage::inline(algorithm),
            HashMode::Worker => {
                let worker = match &self.worker {
                    Some(worker) => worker.clone(),
                    None => HashWorker::spawn().map_err(Error::from)?,
                };
                self.worker = Some(worker.clone());
                HashStage::with_worker(algorithm, worker)
            }
        };

        self.stages = Some(Stages {
            read: Arc::new(ReadStage),
            hash: Arc::new(hash),
            upload: Arc::new(UploadStage::new(
                self.endpoint.clone(),
                self.config.retry.clone(),
            )),
        });

        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.source.is_empty()
            && [&self.read_q, &self.hash_q, &self.upload_q]
                .iter()
                .all(|queue| queue.is_empty() && queue.is_idle())
    }

    fn in_flight(&self) -> usize {
        [&self.read_q, &self.hash_q, &self.upload_q]
            .iter()
            .filter(|queue| !queue.is_idle())
            .count()
    }

    fn queue_mut(&mut self, level: Level) -> Option<&mut StageQueue<Block>> {
        match level {
            Level::Read => Some(&mut self.read_q),
            Level::Hash => Some(&mut self.hash_q),
            Level::Upload => Some(&mut self.upload_q),
            Level::Source | Level::Drain => None,
        }
    }

    fn queue(&self, level: Level) -> Option<&StageQueue<Block>> {
        match level {
            Level::Read => Some(&self.read_q),
            Level::Hash => Some(&self.hash_q),
            Level::Upload => Some(&self.upload_q),
            Level::Source | Level::Drain => None,
        }
    }

    /// Delivers signals until the chain is quiet.
    fn settle(&mut self) {
        while let Some(route) = self.routes.pop_front() {
            match route {
                Route::WantData(Level::Source) => {
                    if self.source.want_data() {
                        self.routes.push_back(Route::SourceData(Level::Read));
                    }
                }
                Route::WantData(Level::Drain) | Route::SourceData(Level::Source) => {}
                Route::WantData(level) => {
                    if let Some(queue) = self.queue(level) {
                        let signals = queue.want_data();
                        push_signals(&mut self.routes, level, signals);
                    }
                }
                Route::SourceData(Level::Drain) => self.drain_one(),
                Route::SourceData(level) => self.start_task(level),
            }
        }
    }

    /// Pulls one item from `level`'s source and starts a task on it, if the
    /// queue has no running task and room in its pool.
    fn start_task(&mut self, level: Level) {
        let Self {
            source,
            read_q,
            hash_q,
            upload_q,
            routes,
            ..
        } = self;

        let started = match level {
            Level::Read => read_q.on_source_data(|| source.pop()),
            Level::Hash => hash_q.on_source_data(|| pop_into(read_q, routes, Level::Read)),
            Level::Upload => upload_q.on_source_data(|| pop_into(hash_q, routes, Level::Hash)),
            Level::Source | Level::Drain => None,
        };
        let Some((ticket, block)) = started else {
            return;
        };
        let Some(stage) = self.stage(level) else {
            return;
        };

        tracing::trace!(
            stage = stage.name(),
            file_id = %block.info.file_id,
            start = block.info.start,
            ticket,
            "task started"
        );

        let progress = Progress::new(self.events_tx.clone(), level, ticket);
        let task = stage.run(block, progress);
        let events = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            let result = task.await;
            let _ = events.send(Event::Finished {
                level,
                ticket,
                result,
            });
        });

        if let Some(queue) = self.queue_mut(level) {
            queue.attach(ticket, handle.abort_handle());
        }
    }

    fn stage(&self, level: Level) -> Option<Arc<dyn Stage>> {
        let stages = self.stages.as_ref()?;
        match level {
            Level::Read => Some(stages.read.clone()),
            Level::Hash => Some(stages.hash.clone()),
            Level::Upload => Some(stages.upload.clone()),
            Level::Source | Level::Drain => None,
        }
    }

    /// The drain's task: consume one uploaded block, then ask for more.
    fn drain_one(&mut self) {
        let Some(block) = pop_into(&mut self.upload_q, &mut self.routes, Level::Upload) else {
            return;
        };
        self.on_block_uploaded(block);
        self.routes.push_back(Route::WantData(Level::Upload));
    }

    fn on_block_uploaded(&mut self, block: Block) {
        let info = block.info;
        let Some(file) = self.files.get_mut(&info.file_id) else {
            return;
        };
        if file.state != FileState::Uploading {
            return;
        }

        self.report.bytes_uploaded += info.length;
        if block.deduplicated {
            self.report.blocks_deduplicated += 1;
        } else {
            self.report.blocks_transferred += 1;
        }
        file.uploaded = file.uploaded.max(info.end());

        if info.last {
            file.state = FileState::Complete;
            tracing::info!(file_id = %info.file_id, name = %file.name, size = file.size, "file uploaded");
            self.report.completed.push(info.file_id.clone());
            self.observer.on_file_complete(&info.file_id);
        }
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Progress {
                level,
                ticket,
                info,
                bytes_sent,
            } => {
                if !self.queue(level).is_some_and(|queue| queue.is_current(ticket)) {
                    return;
                }
                let Some(file) = self.files.get(&info.file_id) else {
                    return;
                };
                if file.state != FileState::Uploading {
                    return;
                }

                let (uploaded, total) = (info.start + bytes_sent, file.size);
                self.observer.on_progress(&info, bytes_sent);
                self.observer.on_file_progress(&info.file_id, uploaded, total);
            }
            Event::Finished {
                level,
                ticket,
                result,
            } => self.on_finished(level, ticket, result),
        }
    }

    fn on_finished(&mut self, level: Level, ticket: Ticket, result: Result<Block>) {
        let Some(queue) = self.queue_mut(level) else {
            return;
        };
        let name = queue.name();

        match result {
            Ok(block) => match queue.finish(ticket, Some(block)) {
                Some((_, signals)) => push_signals(&mut self.routes, level, signals),
                None => tracing::trace!(stage = name, ticket, "stale completion dropped"),
            },
            Err(err) => {
                let Some((file_id, signals)) = queue.finish(ticket, None) else {
                    tracing::trace!(stage = name, ticket, "stale failure dropped");
                    return;
                };
                push_signals(&mut self.routes, level, signals);
                self.fail_file(&file_id, &format!("{name} stage: {err}"));
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::CancelFile(file_id) => {
                if self.halt_file(&file_id, FileState::Cancelled) {
                    tracing::info!(file_id = %file_id, "file cancelled");
                    self.report.cancelled.push(file_id.clone());
                    self.observer.on_file_cancelled(&file_id);
                }
            }
        }
    }

    fn fail_file(&mut self, file_id: &FileId, message: &str) {
        if self.halt_file(file_id, FileState::Failed) {
            tracing::warn!(file_id = %file_id, error = message, "file failed");
            self.report.failed.push((file_id.clone(), message.to_owned()));
            self.observer.on_file_failed(file_id, message);
        }
    }

    /// Drops every remaining block of a file that is still uploading.
    fn halt_file(&mut self, file_id: &FileId, state: FileState) -> bool {
        let Some(file) = self.files.get_mut(file_id) else {
            return false;
        };
        if file.state != FileState::Uploading {
            return false;
        }
        file.state = state;

        self.source.skip_file(file_id);
        for level in [Level::Read, Level::Hash, Level::Upload] {
            if let Some(queue) = self.queue_mut(level) {
                let signals = queue.cancel_file(file_id);
                push_signals(&mut self.routes, level, signals);
            }
        }

        true
    }

    fn fail_remaining(&mut self, message: &str) {
        let stuck: Vec<FileId> = self
            .files
            .iter()
            .filter(|(_, file)| file.state == FileState::Uploading)
            .map(|(id, _)| id.clone())
            .collect();

        for file_id in stuck {
            self.fail_file(&file_id, message);
        }
    }
}

fn push_signals(routes: &mut VecDeque<Route>, level: Level, signals: Signals) {
    if signals.want_upstream {
        routes.push_back(Route::WantData(level.upstream()));
    }
    if signals.data_ready {
        routes.push_back(Route::SourceData(level.downstream()));
    }
}

fn pop_into(queue: &mut StageQueue<Block>, routes: &mut VecDeque<Route>, level: Level) -> Option<Block> {
    let (block, signals) = queue.pop();
    push_signals(routes, level, signals);
    block
}
