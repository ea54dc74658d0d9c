//! Source readers chained directly into a task, wrapped as virtual inputs.
//!
//! A chained source has no upstream peer to deliver checkpoint barriers, so
//! the adapter originates barrier placement itself: when asked, it puts the
//! barrier in front of any data the reader has not yet emitted, making the
//! very next poll return the barrier.

use crate::types::{Barrier, StopMode, StreamElement, StreamRecord};
use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Result of polling a source reader.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePoll<T> {
    /// A data record is available.
    Record(StreamRecord<T>),
    /// The source is exhausted and will produce no further records.
    NoMoreData,
    /// No data ready right now; poll again later.
    Blocked,
}

/// Minimal pull/lifecycle contract for a chained source.
pub trait SourceReader<T> {
    fn open(&mut self) -> Result<()>;

    fn poll_next(&mut self) -> Result<SourcePoll<T>>;

    fn close(&mut self) -> Result<()>;

    /// Ask the reader to stop producing. After a `Drain` stop the reader must
    /// eventually return [`SourcePoll::NoMoreData`] once its remaining data is
    /// emitted. Default: no-op (bounded readers exhaust on their own).
    fn request_stop(&mut self, _mode: StopMode) {}
}

/// Lifecycle phases of a source reader, tracked for call-count assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifeCyclePhase {
    Open,
    PollNext,
    Close,
}

impl LifeCyclePhase {
    pub const ALL: [LifeCyclePhase; 3] = [
        LifeCyclePhase::Open,
        LifeCyclePhase::PollNext,
        LifeCyclePhase::Close,
    ];
}

/// Counts lifecycle calls made on a wrapped source reader.
///
/// Cloned handles share the same counters, so a monitor obtained before the
/// adapter moves into a task stays readable afterwards.
#[derive(Debug, Clone, Default)]
pub struct LifeCycleMonitor {
    counts: Arc<Mutex<HashMap<LifeCyclePhase, usize>>>,
}

impl LifeCycleMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, phase: LifeCyclePhase) {
        let mut counts = self.counts.lock().expect("lifecycle monitor poisoned");
        *counts.entry(phase).or_insert(0) += 1;
    }

    pub fn call_count(&self, phase: LifeCyclePhase) -> usize {
        let counts = self.counts.lock().expect("lifecycle monitor poisoned");
        counts.get(&phase).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        LifeCyclePhase::ALL
            .iter()
            .map(|p| self.call_count(*p))
            .sum()
    }
}

/// Wraps a pull-based source reader as a virtual input channel.
///
/// The adapter owns barrier origination: [`SourceInput::request_barrier_injection`]
/// places a barrier at the current output position, and
/// [`SourceInput::request_stop`] switches the source into drain mode for a
/// terminating savepoint, emitting `EndOfData(Drain)` and then the barrier
/// once the reader exhausts.
pub struct SourceInput<T> {
    reader: Box<dyn SourceReader<T>>,
    monitor: LifeCycleMonitor,
    opened: bool,
    closed: bool,
    /// Control events to emit ahead of further reader output.
    injected: VecDeque<StreamElement<T>>,
    /// Barrier to emit right after the end-of-data marker when draining.
    drain_barrier: Option<Barrier>,
    stop_mode: Option<StopMode>,
    exhausted: bool,
}

impl<T> SourceInput<T> {
    pub fn new(reader: Box<dyn SourceReader<T>>) -> Self {
        Self {
            reader,
            monitor: LifeCycleMonitor::new(),
            opened: false,
            closed: false,
            injected: VecDeque::new(),
            drain_barrier: None,
            stop_mode: None,
            exhausted: false,
        }
    }

    /// Shared handle to the lifecycle call counters.
    pub fn monitor(&self) -> LifeCycleMonitor {
        self.monitor.clone()
    }

    /// Place `barrier` at the current output position: the next poll returns
    /// it before any not-yet-emitted data.
    pub fn request_barrier_injection(&mut self, barrier: Barrier) {
        self.injected.push_back(StreamElement::CheckpointBarrier(barrier));
    }

    /// Begin a terminating drain: the reader keeps being polled until it
    /// returns no-more-data, then the adapter emits `EndOfData(Drain)`
    /// followed by `barrier`.
    pub fn request_stop(&mut self, barrier: Barrier) {
        self.stop_mode = Some(StopMode::Drain);
        self.drain_barrier = Some(barrier);
        self.reader.request_stop(StopMode::Drain);
    }

    /// Whether this input will never produce another element.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.injected.is_empty()
    }

    /// Pull one element. `None` means nothing is ready right now.
    pub fn poll_next(&mut self) -> Result<Option<StreamElement<T>>> {
        if let Some(event) = self.injected.pop_front() {
            return Ok(Some(event));
        }
        if self.exhausted {
            return Ok(None);
        }

        if !self.opened {
            self.monitor.record(LifeCyclePhase::Open);
            self.reader.open()?;
            self.opened = true;
        }

        self.monitor.record(LifeCyclePhase::PollNext);
        match self.reader.poll_next()? {
            SourcePoll::Record(record) => Ok(Some(StreamElement::Record(record))),
            SourcePoll::Blocked => Ok(None),
            SourcePoll::NoMoreData => {
                self.exhausted = true;
                if let Some(barrier) = self.drain_barrier.take() {
                    self.injected
                        .push_back(StreamElement::CheckpointBarrier(barrier));
                }
                let mode = self.stop_mode.take().unwrap_or(StopMode::Drain);
                Ok(Some(StreamElement::EndOfData(mode)))
            }
        }
    }

    /// Close the wrapped reader. No-op if it was never opened.
    pub fn close(&mut self) -> Result<()> {
        if self.opened && !self.closed {
            self.monitor.record(LifeCyclePhase::Close);
            self.reader.close()?;
            self.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CheckpointOptions;

    /// Queue-backed reader: emits queued records, then `Blocked` while
    /// unbounded, `NoMoreData` once stopped or bounded-and-empty.
    struct QueueReader {
        queue: VecDeque<i32>,
        bounded: bool,
        stopped: bool,
    }

    impl QueueReader {
        fn new(values: &[i32], bounded: bool) -> Self {
            Self {
                queue: values.iter().copied().collect(),
                bounded,
                stopped: false,
            }
        }
    }

    impl SourceReader<i32> for QueueReader {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn poll_next(&mut self) -> Result<SourcePoll<i32>> {
            match self.queue.pop_front() {
                Some(v) => Ok(SourcePoll::Record(StreamRecord::new(v))),
                None if self.bounded || self.stopped => Ok(SourcePoll::NoMoreData),
                None => Ok(SourcePoll::Blocked),
            }
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn request_stop(&mut self, _mode: StopMode) {
            self.stopped = true;
        }
    }

    fn barrier(id: u64) -> Barrier {
        Barrier::new(id, 0, CheckpointOptions::aligned())
    }

    #[test]
    fn test_injected_barrier_jumps_ahead_of_pending_data() {
        let mut input = SourceInput::new(Box::new(QueueReader::new(&[1, 2], false)));
        input.request_barrier_injection(barrier(1));

        match input.poll_next().unwrap() {
            Some(StreamElement::CheckpointBarrier(b)) => assert_eq!(b.checkpoint_id, 1),
            other => panic!("expected barrier first, got {other:?}"),
        }
        match input.poll_next().unwrap() {
            Some(StreamElement::Record(rec)) => assert_eq!(rec.value, 1),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_drain_emits_remaining_data_then_end_of_data_then_barrier() {
        let mut input = SourceInput::new(Box::new(QueueReader::new(&[7], false)));
        input.request_stop(barrier(2));

        match input.poll_next().unwrap() {
            Some(StreamElement::Record(rec)) => assert_eq!(rec.value, 7),
            other => panic!("expected record, got {other:?}"),
        }
        assert_eq!(
            input.poll_next().unwrap(),
            Some(StreamElement::EndOfData(StopMode::Drain))
        );
        match input.poll_next().unwrap() {
            Some(StreamElement::CheckpointBarrier(b)) => assert_eq!(b.checkpoint_id, 2),
            other => panic!("expected barrier, got {other:?}"),
        }
        assert!(input.is_exhausted());
        assert!(input.poll_next().unwrap().is_none());
    }

    #[test]
    fn test_blocked_reader_yields_nothing() {
        let mut input = SourceInput::new(Box::new(QueueReader::new(&[], false)));
        assert!(input.poll_next().unwrap().is_none());
        assert!(!input.is_exhausted());
    }

    #[test]
    fn test_lifecycle_monitor_counts_reader_calls() {
        let mut input = SourceInput::new(Box::new(QueueReader::new(&[1], true)));
        let monitor = input.monitor();
        assert_eq!(monitor.total_calls(), 0);

        input.poll_next().unwrap();
        assert_eq!(monitor.call_count(LifeCyclePhase::Open), 1);
        assert_eq!(monitor.call_count(LifeCyclePhase::PollNext), 1);

        input.poll_next().unwrap();
        input.close().unwrap();
        assert_eq!(monitor.call_count(LifeCyclePhase::PollNext), 2);
        assert_eq!(monitor.call_count(LifeCyclePhase::Close), 1);
    }

    #[test]
    fn test_close_without_open_is_not_counted() {
        let mut input = SourceInput::<i32>::new(Box::new(QueueReader::new(&[], false)));
        let monitor = input.monitor();
        input.close().unwrap();
        assert_eq!(monitor.total_calls(), 0);
    }
}
