//! Serialized per-context work queue
//!
//! Each logical execution context (foreground UI, background sync) owns one
//! queue backed by a dedicated worker thread draining an mpsc channel. All
//! mutation of a context's data funnels through its queue, so units of work
//! never run concurrently within a context. `close()` drains pending work
//! before the worker exits, which lets teardown guarantee it never runs
//! concurrently with an enqueued unit of work.

use std::sync::Mutex;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::providers::ContextKind;

/// A unit of work executed on the context's worker.
pub type WorkItem = Box<dyn FnOnce() + Send>;

enum Command {
    Run {
        work: WorkItem,
        done: Option<oneshot::Sender<()>>,
    },
    Shutdown,
}

/// Single-worker serialized queue for one context.
pub struct ContextQueue {
    kind: ContextKind,
    tx: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ContextQueue {
    /// Spawn the worker thread for the given context.
    pub fn spawn(kind: ContextKind) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        let worker = std::thread::Builder::new()
            .name(format!("context-{kind}"))
            .spawn(move || {
                while let Some(command) = rx.blocking_recv() {
                    match command {
                        Command::Run { work, done } => {
                            work();
                            if let Some(done) = done {
                                let _ = done.send(());
                            }
                        }
                        Command::Shutdown => break,
                    }
                }
            })?;

        debug!(context = %kind, "context queue worker started");
        Ok(Self {
            kind,
            tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Enqueue a unit of work. Returns `false` if the queue is closed, in
    /// which case the work is dropped.
    pub fn enqueue(&self, work: WorkItem) -> bool {
        let accepted = self
            .tx
            .send(Command::Run { work, done: None })
            .is_ok();
        if !accepted {
            warn!(context = %self.kind, "enqueue on closed context queue, work dropped");
        }
        accepted
    }

    /// Enqueue a unit of work and receive an ack once it has executed.
    pub fn enqueue_with_ack(&self, work: WorkItem) -> Option<oneshot::Receiver<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        let accepted = self
            .tx
            .send(Command::Run {
                work,
                done: Some(done_tx),
            })
            .is_ok();
        if accepted {
            Some(done_rx)
        } else {
            warn!(context = %self.kind, "enqueue on closed context queue, work dropped");
            None
        }
    }

    /// Block until every unit of work enqueued before this call has run.
    pub fn drain(&self) {
        if let Some(ack) = self.enqueue_with_ack(Box::new(|| {})) {
            let _ = ack.blocking_recv();
        }
    }

    /// Drain pending work, stop the worker and join it. Idempotent; a
    /// second call finds the queue already closed and returns `Ok`.
    pub fn close(&self) -> Result<(), String> {
        self.drain();
        let _ = self.tx.send(Command::Shutdown);
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            worker
                .join()
                .map_err(|_| format!("{} context worker panicked", self.kind))?;
            debug!(context = %self.kind, "context queue closed");
        }
        Ok(())
    }
}
