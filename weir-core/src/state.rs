//! Task state manager contract: the sink that persists snapshots.
//!
//! The actual encoding and storage backend are external; the barrier handler
//! only hands over the per-channel captured elements plus the operator state
//! bytes and observes success or failure.

use crate::types::{ChannelRef, CheckpointId, StreamElement};
use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

/// Elements captured from one channel between its barrier and alignment,
/// persisted as part of an unaligned (or downgraded) checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStateCapture<T> {
    pub channel: ChannelRef,
    pub elements: Vec<StreamElement<T>>,
}

/// Everything handed to the state manager for one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotContents<T> {
    pub checkpoint_id: CheckpointId,
    pub channel_state: Vec<ChannelStateCapture<T>>,
    pub operator_state: Vec<u8>,
}

/// Performs the actual state snapshot and reports completion or failure.
pub trait TaskStateManager<T> {
    fn snapshot(&mut self, contents: SnapshotContents<T>) -> Result<()>;
}

/// State manager that records every snapshot it is asked to take.
///
/// Can be armed to fail a specific checkpoint id, for abort-path tests.
#[derive(Clone, Default)]
pub struct RecordingStateManager<T> {
    reports: Arc<Mutex<Vec<SnapshotContents<T>>>>,
    fail_on: Arc<Mutex<Option<CheckpointId>>>,
}

impl<T: Clone> RecordingStateManager<T> {
    pub fn new() -> Self {
        Self {
            reports: Arc::new(Mutex::new(Vec::new())),
            fail_on: Arc::new(Mutex::new(None)),
        }
    }

    /// Make `snapshot` fail for the given checkpoint id.
    pub fn fail_checkpoint(&self, checkpoint_id: CheckpointId) {
        *self.fail_on.lock().expect("state manager poisoned") = Some(checkpoint_id);
    }

    pub fn reported(&self) -> Vec<SnapshotContents<T>> {
        self.reports.lock().expect("state manager poisoned").clone()
    }

    pub fn latest_reported_checkpoint_id(&self) -> Option<CheckpointId> {
        self.reports
            .lock()
            .expect("state manager poisoned")
            .last()
            .map(|c| c.checkpoint_id)
    }
}

impl<T: Clone> TaskStateManager<T> for RecordingStateManager<T> {
    fn snapshot(&mut self, contents: SnapshotContents<T>) -> Result<()> {
        let fail = *self.fail_on.lock().expect("state manager poisoned");
        if fail == Some(contents.checkpoint_id) {
            return Err(anyhow!(
                "snapshot {} failed (injected)",
                contents.checkpoint_id
            ));
        }
        self.reports
            .lock()
            .expect("state manager poisoned")
            .push(contents);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_state_manager_reports_in_order() {
        let mut manager = RecordingStateManager::<i32>::new();
        for id in [1u64, 2] {
            manager
                .snapshot(SnapshotContents {
                    checkpoint_id: id,
                    channel_state: Vec::new(),
                    operator_state: vec![id as u8],
                })
                .unwrap();
        }
        assert_eq!(manager.latest_reported_checkpoint_id(), Some(2));
        assert_eq!(manager.reported().len(), 2);
    }

    #[test]
    fn test_recording_state_manager_injected_failure() {
        let mut manager = RecordingStateManager::<i32>::new();
        manager.fail_checkpoint(3);
        let err = manager
            .snapshot(SnapshotContents {
                checkpoint_id: 3,
                channel_state: Vec::new(),
                operator_state: Vec::new(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("failed"));
        assert!(manager.latest_reported_checkpoint_id().is_none());
    }
}
