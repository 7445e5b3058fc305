//! Background hashing on a dedicated thread.
//!
//! Requests cross the thread boundary as `{id, command}` and come back as
//! `{id, reply}`. The router task owns the id counter and the table of
//! waiting callers, so the table lives exactly as long as the worker.

use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::{mpsc, oneshot};

use crate::hash::HashAlgorithm;
use crate::{Error, Result};

/// Operations the worker knows how to run.
#[derive(Debug)]
pub enum Command {
    HashBlock {
        algorithm: HashAlgorithm,
        data: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Digest(String),
}

#[derive(Debug)]
struct Request {
    id: u64,
    command: Command,
}

#[derive(Debug)]
struct Response {
    id: u64,
    reply: Reply,
}

type Call = (Command, oneshot::Sender<Reply>);

/// Handle to the hashing thread. Cheap to clone; the thread and its router
/// shut down once every handle is dropped.
#[derive(Clone, Debug)]
pub struct HashWorker {
    calls: mpsc::UnboundedSender<Call>,
}

impl HashWorker {
    /// Starts the worker thread. Must be called from within a tokio runtime.
    pub fn spawn() -> io::Result<Self> {
        let (request_tx, request_rx) = std_mpsc::channel::<Request>();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<Response>();
        let (calls_tx, calls_rx) = mpsc::unbounded_channel::<Call>();

        thread::Builder::new()
            .name("blocksend-hash".into())
            .spawn(move || {
                while let Ok(request) = request_rx.recv() {
                    let reply = execute(request.command);
                    if response_tx.send(Response { id: request.id, reply }).is_err() {
                        break;
                    }
                }
            })?;

        tokio::spawn(route(calls_rx, request_tx, response_rx));

        Ok(Self { calls: calls_tx })
    }

    pub async fn call(&self, command: Command) -> Result<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.calls
            .send((command, reply_tx))
            .map_err(|_| Error::WorkerError("worker has shut down".into()))?;

        reply_rx
            .await
            .map_err(|_| Error::WorkerError("worker dropped the request".into()))
    }

    pub async fn hash(&self, algorithm: HashAlgorithm, data: Bytes) -> Result<String> {
        match self.call(Command::HashBlock { algorithm, data }).await? {
            Reply::Digest(digest) => Ok(digest),
        }
    }
}

fn execute(command: Command) -> Reply {
    match command {
        Command::HashBlock { algorithm, data } => Reply::Digest(algorithm.hash_hex(&data)),
    }
}

async fn route(
    mut calls: mpsc::UnboundedReceiver<Call>,
    requests: std_mpsc::Sender<Request>,
    mut responses: mpsc::UnboundedReceiver<Response>,
) {
    let mut next_id: u64 = 0;
    let mut waiting: HashMap<u64, oneshot::Sender<Reply>> = HashMap::new();

    loop {
        tokio::select! {
            call = calls.recv() => {
                let Some((command, reply)) = call else {
                    break;
                };
                let id = next_id;
                next_id += 1;

                if requests.send(Request { id, command }).is_err() {
                    tracing::error!("hash worker thread exited");
                    break;
                }
                waiting.insert(id, reply);
            }
            Some(response) = responses.recv() => {
                match waiting.remove(&response.id) {
                    // The caller may have been cancelled; its result is ignored.
                    Some(reply) => {
                        let _ = reply.send(response.reply);
                    }
                    None => tracing::warn!(id = response.id, "unexpected worker response"),
                }
            }
        }
    }
}
