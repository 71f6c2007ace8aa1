//! The control channel (component H): the single observable surface between
//! running workers and the graph supervisor. Workers never share mutable
//! state directly; every lifecycle event and error crosses this channel.

use crossbeam_channel::{Receiver, Sender};

use crate::block::BlockId;

/// One lifecycle event relayed from a worker to the supervisor.
#[derive(Debug, Clone)]
pub enum ControlMsg {
    /// A worker has begun its run loop.
    Started { block: BlockId },
    /// A worker has exited cleanly (its output buffers are closed).
    Stopped { block: BlockId },
    /// A worker observed a fatal error and is about to exit.
    Error {
        block: BlockId,
        kind: &'static str,
        detail: String,
    },
}

impl ControlMsg {
    pub fn block(&self) -> BlockId {
        match self {
            ControlMsg::Started { block }
            | ControlMsg::Stopped { block }
            | ControlMsg::Error { block, .. } => *block,
        }
    }
}

/// A thin wrapper over an MPSC channel, mirroring the send/receive surface
/// the rest of this crate's lineage exposes for its own control channels:
/// non-blocking and blocking variants of both ends, rather than hand-rolling
/// a synchronization primitive.
#[derive(Clone)]
pub struct ControlSender {
    tx: Sender<ControlMsg>,
}

impl ControlSender {
    /// Sends without blocking; the channel is unbounded, so this never
    /// actually blocks, but the name documents intent at call sites.
    pub fn send(&self, msg: ControlMsg) {
        // The receiving end (the supervisor in `wait()`) always outlives
        // every worker, so a disconnected channel can only mean the
        // supervisor itself has already torn down -- nothing to relay to.
        let _ = self.tx.send(msg);
    }
}

pub struct ControlReceiver {
    rx: Receiver<ControlMsg>,
}

impl ControlReceiver {
    /// Returns the next message without blocking, if one is queued.
    pub fn try_recv(&self) -> Option<ControlMsg> {
        self.rx.try_recv().ok()
    }

    /// Blocks until a message arrives or every sender has been dropped.
    pub fn recv_blocking(&self) -> Option<ControlMsg> {
        self.rx.recv().ok()
    }

    /// Drains every message currently queued without blocking.
    pub fn drain(&self) -> Vec<ControlMsg> {
        self.rx.try_iter().collect()
    }
}

/// Creates a fresh, unbounded control channel for one graph run.
pub fn channel() -> (ControlSender, ControlReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ControlSender { tx }, ControlReceiver { rx })
}
