//! Local channels feeding a task's network inputs.
//!
//! Uses crossbeam-channel for bounded, backpressure-aware delivery from
//! upstream peers. The task-side scheduler polls these channels without
//! blocking; whatever delay the transport imposes simply surfaces as
//! "no data ready".

use crate::types::StreamElement;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};

/// Default channel buffer size (bounded for backpressure).
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Sender side of a local channel.
#[derive(Clone)]
pub struct LocalChannelSender<T> {
    sender: Sender<StreamElement<T>>,
}

impl<T> LocalChannelSender<T> {
    /// Send a stream element. Blocks if the channel is full (backpressure).
    pub fn send(&self, element: StreamElement<T>) -> Result<()> {
        self.sender
            .send(element)
            .map_err(|_| anyhow!("channel closed: receiver dropped"))
    }

    /// Try to send without blocking.
    pub fn try_send(&self, element: StreamElement<T>) -> Result<()> {
        self.sender
            .try_send(element)
            .map_err(|e| anyhow!("failed to send: {e:?}"))
    }
}

/// Receiver side of a local channel.
pub struct LocalChannelReceiver<T> {
    pub(crate) receiver: Receiver<StreamElement<T>>,
}

impl<T> LocalChannelReceiver<T> {
    /// Receive the next stream element, blocking until one is available.
    pub fn recv(&self) -> Result<StreamElement<T>> {
        self.receiver
            .recv()
            .map_err(|_| anyhow!("channel closed: sender dropped"))
    }

    /// Try to receive without blocking. Returns `None` when no element is
    /// ready. A disconnected channel that was not terminated with
    /// `EndOfPartition` is an error.
    pub fn try_recv(&self) -> Result<Option<StreamElement<T>>> {
        match self.receiver.try_recv() {
            Ok(elem) => Ok(Some(elem)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                Err(anyhow!("channel closed: sender dropped"))
            }
        }
    }
}

/// Create a bounded local channel pair.
pub fn local_channel<T>(capacity: usize) -> (LocalChannelSender<T>, LocalChannelReceiver<T>) {
    let (sender, receiver) = bounded(capacity);
    (
        LocalChannelSender { sender },
        LocalChannelReceiver { receiver },
    )
}

/// Create a local channel with default capacity.
pub fn local_channel_default<T>() -> (LocalChannelSender<T>, LocalChannelReceiver<T>) {
    local_channel(DEFAULT_CHANNEL_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StopMode;

    #[test]
    fn test_local_channel_send_recv() {
        let (sender, receiver) = local_channel::<i32>(10);
        sender.send(StreamElement::record(42)).unwrap();
        match receiver.recv().unwrap() {
            StreamElement::Record(rec) => assert_eq!(rec.value, 42),
            _ => panic!("expected Record"),
        }
    }

    #[test]
    fn test_local_channel_try_recv_empty() {
        let (sender, receiver) = local_channel::<i32>(10);
        assert!(receiver.try_recv().unwrap().is_none());
        sender.send(StreamElement::EndOfData(StopMode::Drain)).unwrap();
        assert_eq!(
            receiver.try_recv().unwrap(),
            Some(StreamElement::EndOfData(StopMode::Drain))
        );
    }

    #[test]
    fn test_local_channel_backpressure() {
        let (sender, receiver) = local_channel::<i32>(2);
        sender.send(StreamElement::record(1)).unwrap();
        sender.send(StreamElement::record(2)).unwrap();
        assert!(sender.try_send(StreamElement::record(3)).is_err());

        receiver.recv().unwrap();
        sender.try_send(StreamElement::record(3)).unwrap();
    }

    #[test]
    fn test_local_channel_disconnect_is_error() {
        let (sender, receiver) = local_channel::<i32>(10);
        sender.send(StreamElement::record(1)).unwrap();
        drop(sender);

        assert!(receiver.try_recv().unwrap().is_some());
        assert!(receiver.try_recv().is_err());
    }
}
