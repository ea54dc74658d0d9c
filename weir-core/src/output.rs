//! Downstream result partition writer contract.
//!
//! The barrier handler and task loop drive this interface; the writer itself
//! is an external collaborator. Broadcast calls are atomic with respect to
//! the control thread: all output channels observe the marker in the same
//! processing step.

use crate::channel::LocalChannelSender;
use crate::types::{Barrier, StopMode, StreamElement, Watermark};
use anyhow::Result;
use std::sync::{Arc, Mutex};

/// Sink for everything a task emits downstream.
pub trait ResultPartitionWriter<T> {
    /// Emit a data element (record or latency marker) on its output channel.
    fn emit(&mut self, element: StreamElement<T>) -> Result<()>;

    /// Broadcast a watermark to all output channels.
    fn broadcast_watermark(&mut self, watermark: Watermark) -> Result<()>;

    /// Broadcast a checkpoint barrier to all output channels.
    fn broadcast_barrier(&mut self, barrier: Barrier) -> Result<()>;

    /// Broadcast an end-of-data marker to all output channels.
    fn broadcast_end_of_data(&mut self, mode: StopMode) -> Result<()>;
}

/// Writer backed by local channels to downstream tasks.
pub struct ChannelPartitionWriter<T> {
    channels: Vec<LocalChannelSender<T>>,
}

impl<T> ChannelPartitionWriter<T> {
    pub fn new(channels: Vec<LocalChannelSender<T>>) -> Self {
        Self { channels }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn broadcast(&self, element: StreamElement<T>) -> Result<()>
    where
        T: Clone,
    {
        if self.channels.is_empty() {
            return Ok(());
        }
        // Clone for all but the last channel.
        for channel in &self.channels[..self.channels.len() - 1] {
            channel.send(element.clone())?;
        }
        self.channels[self.channels.len() - 1].send(element)
    }
}

impl<T: Clone> ResultPartitionWriter<T> for ChannelPartitionWriter<T> {
    fn emit(&mut self, element: StreamElement<T>) -> Result<()> {
        // Single downstream channel per output for now; partitioned routing
        // lives outside this core.
        self.channels[0].send(element)
    }

    fn broadcast_watermark(&mut self, watermark: Watermark) -> Result<()> {
        self.broadcast(StreamElement::Watermark(watermark))
    }

    fn broadcast_barrier(&mut self, barrier: Barrier) -> Result<()> {
        self.broadcast(StreamElement::CheckpointBarrier(barrier))
    }

    fn broadcast_end_of_data(&mut self, mode: StopMode) -> Result<()> {
        self.broadcast(StreamElement::EndOfData(mode))
    }
}

/// Writer that collects everything into a shared buffer, in emission order.
///
/// Broadcast markers are recorded once. Used by tests to assert the exact
/// downstream ordering of records and control events.
#[derive(Clone, Default)]
pub struct CollectingWriter<T> {
    collected: Arc<Mutex<Vec<StreamElement<T>>>>,
}

impl<T: Clone> CollectingWriter<T> {
    pub fn new() -> Self {
        Self {
            collected: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of everything emitted so far.
    pub fn output(&self) -> Vec<StreamElement<T>> {
        self.collected.lock().expect("collecting writer poisoned").clone()
    }

    fn push(&self, element: StreamElement<T>) {
        self.collected
            .lock()
            .expect("collecting writer poisoned")
            .push(element);
    }
}

impl<T: Clone> ResultPartitionWriter<T> for CollectingWriter<T> {
    fn emit(&mut self, element: StreamElement<T>) -> Result<()> {
        self.push(element);
        Ok(())
    }

    fn broadcast_watermark(&mut self, watermark: Watermark) -> Result<()> {
        self.push(StreamElement::Watermark(watermark));
        Ok(())
    }

    fn broadcast_barrier(&mut self, barrier: Barrier) -> Result<()> {
        self.push(StreamElement::CheckpointBarrier(barrier));
        Ok(())
    }

    fn broadcast_end_of_data(&mut self, mode: StopMode) -> Result<()> {
        self.push(StreamElement::EndOfData(mode));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::local_channel;
    use crate::types::CheckpointOptions;

    #[test]
    fn test_channel_writer_broadcast_reaches_all_channels() {
        let (s1, r1) = local_channel::<i32>(10);
        let (s2, r2) = local_channel::<i32>(10);
        let mut writer = ChannelPartitionWriter::new(vec![s1, s2]);

        let barrier = Barrier::new(1, 5, CheckpointOptions::aligned());
        writer.broadcast_barrier(barrier).unwrap();

        assert_eq!(r1.recv().unwrap(), StreamElement::CheckpointBarrier(barrier));
        assert_eq!(r2.recv().unwrap(), StreamElement::CheckpointBarrier(barrier));
    }

    #[test]
    fn test_collecting_writer_preserves_order() {
        let mut writer = CollectingWriter::<i32>::new();
        writer.emit(StreamElement::record(1)).unwrap();
        writer
            .broadcast_barrier(Barrier::new(1, 0, CheckpointOptions::aligned()))
            .unwrap();
        writer.emit(StreamElement::record(2)).unwrap();

        let output = writer.output();
        assert_eq!(output.len(), 3);
        assert!(matches!(output[1], StreamElement::CheckpointBarrier(_)));
    }
}
