use serde::{Deserialize, Serialize};

/// Event time in milliseconds since epoch.
pub type EventTime = i64;

/// Unique identifier for checkpoint barriers.
///
/// Monotonically increasing across the lifetime of a task; the barrier
/// handler discards any id at or below the latest completed/aborted one.
pub type CheckpointId = u64;

/// What kind of snapshot a checkpoint produces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Periodic checkpoint for failure recovery.
    Checkpoint,
    /// User-requested savepoint; the job keeps running.
    Savepoint,
    /// Stop-with-savepoint: sources must drain before the snapshot completes.
    TerminatingSavepoint,
}

impl CheckpointKind {
    /// Whether this checkpoint terminates the job and requires source drain.
    pub fn is_terminating(&self) -> bool {
        matches!(self, CheckpointKind::TerminatingSavepoint)
    }
}

/// How barriers are aligned across input channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlignmentMode {
    /// Wait for the barrier on every channel; early channels are blocked.
    Aligned,
    /// Broadcast the barrier on first arrival; in-flight records on slower
    /// channels are captured as channel state.
    Unaligned,
    /// Start aligned; downgrade the remaining channels to unaligned behavior
    /// if alignment takes longer than the given number of milliseconds.
    AlignedWithTimeout(u64),
}

/// Checkpoint trigger options carried by every barrier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointOptions {
    pub kind: CheckpointKind,
    pub alignment: AlignmentMode,
}

impl CheckpointOptions {
    /// Plain aligned checkpoint.
    pub fn aligned() -> Self {
        Self {
            kind: CheckpointKind::Checkpoint,
            alignment: AlignmentMode::Aligned,
        }
    }

    /// Unaligned checkpoint.
    pub fn unaligned() -> Self {
        Self {
            kind: CheckpointKind::Checkpoint,
            alignment: AlignmentMode::Unaligned,
        }
    }

    /// Aligned checkpoint that downgrades to unaligned after `timeout_ms`.
    pub fn aligned_with_timeout(timeout_ms: u64) -> Self {
        Self {
            kind: CheckpointKind::Checkpoint,
            alignment: AlignmentMode::AlignedWithTimeout(timeout_ms),
        }
    }

    /// Terminating (stop-with-drain) savepoint. Always aligned.
    pub fn terminating_savepoint() -> Self {
        Self {
            kind: CheckpointKind::TerminatingSavepoint,
            alignment: AlignmentMode::Aligned,
        }
    }

    pub fn is_unaligned(&self) -> bool {
        matches!(self.alignment, AlignmentMode::Unaligned)
    }

    pub fn is_timeoutable(&self) -> bool {
        matches!(self.alignment, AlignmentMode::AlignedWithTimeout(_))
    }
}

/// Checkpoint barrier flowing in-band with the data.
///
/// Partitions every stream deterministically into pre- and post-checkpoint
/// records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Barrier {
    pub checkpoint_id: CheckpointId,
    pub timestamp: EventTime,
    pub options: CheckpointOptions,
}

impl Barrier {
    pub fn new(checkpoint_id: CheckpointId, timestamp: EventTime, options: CheckpointOptions) -> Self {
        Self {
            checkpoint_id,
            timestamp,
            options,
        }
    }
}

/// Metadata accompanying an RPC checkpoint trigger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointMetadata {
    pub checkpoint_id: CheckpointId,
    pub timestamp: EventTime,
}

impl CheckpointMetadata {
    pub fn new(checkpoint_id: CheckpointId, timestamp: EventTime) -> Self {
        Self {
            checkpoint_id,
            timestamp,
        }
    }
}

/// Stop mode attached to end-of-data markers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopMode {
    /// The producer emitted all of its data; downstream must treat this as a
    /// terminal boundary (reconciled with any in-flight terminating savepoint).
    Drain,
    /// The producer stopped without draining.
    NoDrain,
}

/// Watermark indicates that no elements with timestamp <= this value will arrive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    pub timestamp: EventTime,
}

impl Watermark {
    /// Maximal watermark, emitted when a stream logically finishes.
    pub const MAX: Watermark = Watermark {
        timestamp: EventTime::MAX,
    };

    pub fn new(timestamp: EventTime) -> Self {
        Self { timestamp }
    }
}

/// Marker used to measure end-to-end latency; forwarded, never processed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LatencyMarker {
    pub marked_time: EventTime,
}

/// A record in the stream, carrying user data and optional event time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamRecord<T> {
    pub value: T,
    pub timestamp: Option<EventTime>,
}

impl<T> StreamRecord<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            timestamp: None,
        }
    }

    pub fn with_timestamp(value: T, timestamp: EventTime) -> Self {
        Self {
            value,
            timestamp: Some(timestamp),
        }
    }
}

/// The fundamental unit flowing through a channel: data records plus the
/// inline control events the barrier handler consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StreamElement<T> {
    /// User data record.
    Record(StreamRecord<T>),
    /// Watermark for event time progress tracking.
    Watermark(Watermark),
    /// Latency measurement marker.
    LatencyMarker(LatencyMarker),
    /// Checkpoint barrier.
    CheckpointBarrier(Barrier),
    /// The channel will deliver no further data records; control events
    /// (barriers) may still follow.
    EndOfData(StopMode),
    /// The channel is fully exhausted, including control events.
    EndOfPartition,
}

impl<T> StreamElement<T> {
    pub fn record(value: T) -> Self {
        Self::Record(StreamRecord::new(value))
    }

    pub fn timestamped_record(value: T, timestamp: EventTime) -> Self {
        Self::Record(StreamRecord::with_timestamp(value, timestamp))
    }

    pub fn watermark(timestamp: EventTime) -> Self {
        Self::Watermark(Watermark::new(timestamp))
    }

    pub fn barrier(barrier: Barrier) -> Self {
        Self::CheckpointBarrier(barrier)
    }

    /// Whether this element is delivered to the operator chain (as opposed to
    /// the barrier handler).
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            StreamElement::Record(_) | StreamElement::Watermark(_) | StreamElement::LatencyMarker(_)
        )
    }
}

/// Identifies one physical or virtual channel within one logical input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub input_index: usize,
    pub channel_index: usize,
}

impl ChannelRef {
    pub fn new(input_index: usize, channel_index: usize) -> Self {
        Self {
            input_index,
            channel_index,
        }
    }
}

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "input_{}_channel_{}", self.input_index, self.channel_index)
    }
}
