//! Point-to-point and broadcast messaging between master and workers.
//!
//! The master talks through the [`Transport`] trait so the control plane
//! stays independent of the wire. [`InProcNetwork`] is the in-process
//! realization over unbounded channels: one mailbox per worker plus a
//! shared return path, with per-kind buffering on the master side so the
//! barrier can read selectively.

use std::collections::{HashMap, HashSet, VecDeque};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::MasterError;
use crate::messages::{Envelope, MasterMessage, MessageTag, WorkerMessage};
use crate::task::WorkerId;

/// Messaging surface the master requires.
///
/// Per-destination sends are FIFO and non-blocking; sends to a worker
/// that has gone away are dropped silently.
pub trait Transport: Send {
    /// Non-blocking point-to-point send.
    fn send(&mut self, dst: WorkerId, msg: WorkerMessage);

    /// Non-blocking send to every worker.
    fn broadcast(&mut self, msg: WorkerMessage);

    /// Non-blocking read of the next buffered message of `tag`, from any
    /// source.
    fn try_read(&mut self, tag: MessageTag) -> Option<Envelope>;

    /// Await the next message of `tag` from any source.
    fn read(&mut self, tag: MessageTag) -> BoxFuture<'_, Result<Envelope, MasterError>>;

    /// Broadcast `msg`, then await one `reply` message from each worker in
    /// `from`. Callers pass the alive set; replies from other workers are
    /// consumed and dropped.
    fn sync_broadcast<'a>(
        &'a mut self,
        msg: WorkerMessage,
        reply: MessageTag,
        from: &'a [WorkerId],
    ) -> BoxFuture<'a, Result<Vec<Envelope>, MasterError>>;
}

/// Worker-side endpoint of an [`InProcNetwork`].
pub struct WorkerLink {
    pub id: WorkerId,
    pub inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    outbox: mpsc::UnboundedSender<Envelope>,
}

impl WorkerLink {
    /// Send a message back to the master.
    pub fn send(&self, msg: MasterMessage) {
        let _ = self.outbox.send(Envelope { from: self.id, msg });
    }
}

/// In-process channel mesh connecting one master to `n` workers.
pub struct InProcNetwork {
    to_workers: Vec<mpsc::UnboundedSender<WorkerMessage>>,
    from_workers: mpsc::UnboundedReceiver<Envelope>,
    pending: HashMap<MessageTag, VecDeque<Envelope>>,
}

impl InProcNetwork {
    /// Build the mesh, returning the master endpoint and one link per
    /// worker slot.
    pub fn with_workers(n: usize) -> (Self, Vec<WorkerLink>) {
        let (master_tx, master_rx) = mpsc::unbounded_channel();
        let mut to_workers = Vec::with_capacity(n);
        let mut links = Vec::with_capacity(n);
        for slot in 0..n {
            let (tx, rx) = mpsc::unbounded_channel();
            to_workers.push(tx);
            links.push(WorkerLink {
                id: WorkerId(slot),
                inbox: rx,
                outbox: master_tx.clone(),
            });
        }
        let network = Self {
            to_workers,
            from_workers: master_rx,
            pending: HashMap::new(),
        };
        (network, links)
    }

    fn buffer(&mut self, env: Envelope) {
        self.pending.entry(env.msg.tag()).or_default().push_back(env);
    }

    /// Move everything already sitting in the shared channel into the
    /// per-tag buffers.
    fn drain_incoming(&mut self) {
        while let Ok(env) = self.from_workers.try_recv() {
            self.buffer(env);
        }
    }
}

impl Transport for InProcNetwork {
    fn send(&mut self, dst: WorkerId, msg: WorkerMessage) {
        if let Some(tx) = self.to_workers.get(dst.0) {
            if tx.send(msg).is_err() {
                debug!(worker = dst.0, "dropping send to disconnected worker");
            }
        }
    }

    fn broadcast(&mut self, msg: WorkerMessage) {
        for (slot, tx) in self.to_workers.iter().enumerate() {
            if tx.send(msg.clone()).is_err() {
                debug!(worker = slot, "dropping broadcast to disconnected worker");
            }
        }
    }

    fn try_read(&mut self, tag: MessageTag) -> Option<Envelope> {
        self.drain_incoming();
        self.pending.get_mut(&tag).and_then(|queue| queue.pop_front())
    }

    fn read(&mut self, tag: MessageTag) -> BoxFuture<'_, Result<Envelope, MasterError>> {
        Box::pin(async move {
            loop {
                if let Some(env) = self.try_read(tag) {
                    return Ok(env);
                }
                match self.from_workers.recv().await {
                    Some(env) => self.buffer(env),
                    None => return Err(MasterError::Disconnected),
                }
            }
        })
    }

    fn sync_broadcast<'a>(
        &'a mut self,
        msg: WorkerMessage,
        reply: MessageTag,
        from: &'a [WorkerId],
    ) -> BoxFuture<'a, Result<Vec<Envelope>, MasterError>> {
        Box::pin(async move {
            self.broadcast(msg);
            let mut awaiting: HashSet<WorkerId> = from.iter().copied().collect();
            let mut replies = Vec::with_capacity(awaiting.len());
            while !awaiting.is_empty() {
                let env = self.read(reply).await?;
                if awaiting.remove(&env.from) {
                    replies.push(env);
                }
            }
            Ok(replies)
        })
    }
}
