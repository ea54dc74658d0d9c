//! Control mailbox for the single-threaded task loop.
//!
//! External actions (RPC triggers, coordinator notifications) are queued here
//! and drained between processing steps, in arrival order. They never preempt
//! an in-progress step. RPC results travel back through one-shot futures.

use crate::types::{CheckpointId, CheckpointMetadata, CheckpointOptions};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use std::time::Duration;

/// One queued external action.
#[derive(Debug)]
pub enum TaskMail {
    TriggerCheckpoint {
        metadata: CheckpointMetadata,
        options: CheckpointOptions,
        promise: CheckpointPromise,
    },
    NotifyCheckpointComplete(CheckpointId),
    NotifyCheckpointAbort(CheckpointId),
}

/// Resolving half of a one-shot checkpoint future.
#[derive(Debug)]
pub struct CheckpointPromise {
    tx: Sender<bool>,
}

impl CheckpointPromise {
    /// Resolve the future. The caller may have dropped it; that is fine.
    pub fn complete(self, accepted: bool) {
        let _ = self.tx.send(accepted);
    }
}

/// RPC-facing result of a checkpoint trigger. `false` means declined or
/// superseded.
#[derive(Debug)]
pub struct CheckpointFuture {
    rx: Receiver<bool>,
    resolved: Option<bool>,
}

impl CheckpointFuture {
    pub fn is_done(&mut self) -> bool {
        self.try_get().is_some()
    }

    /// Non-blocking read of the result.
    pub fn try_get(&mut self) -> Option<bool> {
        if self.resolved.is_none() {
            if let Ok(value) = self.rx.try_recv() {
                self.resolved = Some(value);
            }
        }
        self.resolved
    }

    /// Wait up to `timeout` for the result.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<bool> {
        if self.resolved.is_none() {
            if let Ok(value) = self.rx.recv_timeout(timeout) {
                self.resolved = Some(value);
            }
        }
        self.resolved
    }
}

/// Create a one-shot promise/future pair.
pub fn checkpoint_result() -> (CheckpointPromise, CheckpointFuture) {
    let (tx, rx) = bounded(1);
    (
        CheckpointPromise { tx },
        CheckpointFuture { rx, resolved: None },
    )
}

/// Cloneable sending side of a task's mailbox, handed to the RPC boundary.
#[derive(Clone)]
pub struct MailboxHandle {
    tx: Sender<TaskMail>,
}

impl MailboxHandle {
    /// Queue a checkpoint trigger; the returned future resolves once the task
    /// accepts or declines it.
    pub fn trigger_checkpoint_async(
        &self,
        metadata: CheckpointMetadata,
        options: CheckpointOptions,
    ) -> CheckpointFuture {
        let (promise, future) = checkpoint_result();
        if self
            .tx
            .send(TaskMail::TriggerCheckpoint {
                metadata,
                options,
                promise,
            })
            .is_err()
        {
            // Task is gone; resolve the future as declined.
            let (promise, future) = checkpoint_result();
            promise.complete(false);
            return future;
        }
        future
    }

    pub fn notify_checkpoint_complete_async(&self, checkpoint_id: CheckpointId) {
        let _ = self.tx.send(TaskMail::NotifyCheckpointComplete(checkpoint_id));
    }

    pub fn notify_checkpoint_abort_async(&self, checkpoint_id: CheckpointId) {
        let _ = self.tx.send(TaskMail::NotifyCheckpointAbort(checkpoint_id));
    }
}

/// Receiving side, owned by the task loop.
pub struct Mailbox {
    tx: Sender<TaskMail>,
    rx: Receiver<TaskMail>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn handle(&self) -> MailboxHandle {
        MailboxHandle {
            tx: self.tx.clone(),
        }
    }

    /// Take the next queued mail, if any.
    pub fn try_take(&self) -> Option<TaskMail> {
        match self.rx.try_recv() {
            Ok(mail) => Some(mail),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<TaskMail> {
        &self.rx
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_preserves_arrival_order() {
        let mailbox = Mailbox::new();
        let handle = mailbox.handle();
        handle.notify_checkpoint_complete_async(1);
        handle.notify_checkpoint_abort_async(2);

        assert!(matches!(
            mailbox.try_take(),
            Some(TaskMail::NotifyCheckpointComplete(1))
        ));
        assert!(matches!(
            mailbox.try_take(),
            Some(TaskMail::NotifyCheckpointAbort(2))
        ));
        assert!(mailbox.try_take().is_none());
    }

    #[test]
    fn test_checkpoint_future_resolves_once() {
        let (promise, mut future) = checkpoint_result();
        assert!(!future.is_done());
        promise.complete(true);
        assert_eq!(future.try_get(), Some(true));
        // Result is sticky.
        assert_eq!(future.try_get(), Some(true));
    }

    #[test]
    fn test_trigger_through_mailbox_carries_promise() {
        let mailbox = Mailbox::new();
        let handle = mailbox.handle();
        let mut future = handle.trigger_checkpoint_async(
            crate::types::CheckpointMetadata::new(1, 100),
            crate::types::CheckpointOptions::aligned(),
        );

        match mailbox.try_take() {
            Some(TaskMail::TriggerCheckpoint {
                metadata, promise, ..
            }) => {
                assert_eq!(metadata.checkpoint_id, 1);
                promise.complete(false);
            }
            other => panic!("expected trigger mail, got {other:?}"),
        }
        assert_eq!(future.try_get(), Some(false));
    }
}
