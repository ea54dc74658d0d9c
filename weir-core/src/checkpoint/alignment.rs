use super::*;

/// Static shape of one logical input, declared at task construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputDescriptor {
    pub num_channels: usize,
    pub source_backed: bool,
}

impl InputDescriptor {
    /// A network-fed input with the given number of channels.
    pub fn network(num_channels: usize) -> Self {
        Self {
            num_channels,
            source_backed: false,
        }
    }

    /// A chained-source input (always exactly one virtual channel).
    pub fn source() -> Self {
        Self {
            num_channels: 1,
            source_backed: true,
        }
    }
}

/// Lifecycle of one in-flight checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStatus {
    Collecting,
    Aligned,
    Aborted,
}

/// Per-channel alignment bookkeeping for one checkpoint.
///
/// `captured` holds elements that overtook the barrier on this channel while
/// an unaligned (or downgraded) checkpoint was in flight; they become part of
/// the channel's snapshot state. Owned exclusively by the barrier handler and
/// mutated only on the processing thread.
#[derive(Debug)]
pub struct ChannelAlignmentState<T> {
    pub barrier_received: bool,
    pub captured: Vec<StreamElement<T>>,
}

impl<T> Default for ChannelAlignmentState<T> {
    fn default() -> Self {
        Self {
            barrier_received: false,
            captured: Vec::new(),
        }
    }
}

/// Alignment state for every channel of one logical input.
#[derive(Debug)]
pub struct InputAlignmentState<T> {
    pub channels: Vec<ChannelAlignmentState<T>>,
    pub is_source_backed: bool,
    /// Terminating savepoints only: the source reached `EndOfData(Drain)`.
    pub drained: bool,
}

/// Returned by [`TaskCheckpointState::capture`] when the bounded capture
/// buffer would be exceeded; the handler aborts the checkpoint.
#[derive(Debug)]
pub struct CaptureOverflow;

/// The one live per-checkpoint state instance.
///
/// Created when a checkpoint id is first observed via trigger or barrier,
/// destroyed when the snapshot completes, aborts, or is superseded by a
/// higher id.
#[derive(Debug)]
pub struct TaskCheckpointState<T> {
    pub checkpoint_id: CheckpointId,
    pub timestamp: EventTime,
    pub options: CheckpointOptions,
    pub inputs: Vec<InputAlignmentState<T>>,
    pub status: CheckpointStatus,
    /// The barrier has already been sent downstream (unaligned mode, or an
    /// aligned-with-timeout checkpoint after downgrade).
    pub barrier_broadcast: bool,
    /// Remaining channels were switched to unaligned behavior in place.
    pub downgraded: bool,
    /// Deadline armed for `AlignedWithTimeout` checkpoints.
    pub align_deadline: Option<Instant>,
    pub(crate) promise: Option<CheckpointPromise>,
    captured_total: usize,
}

impl<T> TaskCheckpointState<T> {
    pub fn new(
        checkpoint_id: CheckpointId,
        timestamp: EventTime,
        options: CheckpointOptions,
        layout: &[InputDescriptor],
    ) -> Self {
        let inputs = layout
            .iter()
            .map(|desc| InputAlignmentState {
                channels: (0..desc.num_channels)
                    .map(|_| ChannelAlignmentState::default())
                    .collect(),
                is_source_backed: desc.source_backed,
                drained: false,
            })
            .collect();
        let align_deadline = match options.alignment {
            AlignmentMode::AlignedWithTimeout(ms) => {
                Some(Instant::now() + Duration::from_millis(ms))
            }
            _ => None,
        };
        Self {
            checkpoint_id,
            timestamp,
            options,
            inputs,
            status: CheckpointStatus::Collecting,
            barrier_broadcast: false,
            downgraded: false,
            align_deadline,
            promise: None,
            captured_total: 0,
        }
    }

    /// The barrier this checkpoint travels under.
    pub fn barrier(&self) -> Barrier {
        Barrier::new(self.checkpoint_id, self.timestamp, self.options)
    }

    /// Mark a barrier received on `channel`. Returns `false` for a duplicate.
    pub fn mark_barrier(&mut self, channel: ChannelRef) -> bool {
        let state = &mut self.inputs[channel.input_index].channels[channel.channel_index];
        if state.barrier_received {
            return false;
        }
        state.barrier_received = true;
        true
    }

    /// Record that a source-backed input reached `EndOfData(Drain)`.
    pub fn mark_drained(&mut self, input_index: usize) {
        self.inputs[input_index].drained = true;
    }

    /// Whether channels that report their barrier should be blocked.
    pub fn blocks_on_alignment(&self) -> bool {
        !self.options.is_unaligned() && !self.downgraded
    }

    /// Whether an element arriving on `channel` must be captured as channel
    /// state (unaligned or downgraded checkpoint, channel not yet aligned).
    pub fn should_capture(&self, channel: ChannelRef, finished: &[Vec<bool>]) -> bool {
        if !(self.options.is_unaligned() || self.downgraded) {
            return false;
        }
        if finished[channel.input_index][channel.channel_index] {
            return false;
        }
        !self.inputs[channel.input_index].channels[channel.channel_index].barrier_received
    }

    /// Capture one overtaken element into the channel's snapshot state.
    pub fn capture(
        &mut self,
        channel: ChannelRef,
        element: StreamElement<T>,
        limit: usize,
    ) -> Result<(), CaptureOverflow> {
        if self.captured_total >= limit {
            return Err(CaptureOverflow);
        }
        self.captured_total += 1;
        self.inputs[channel.input_index].channels[channel.channel_index]
            .captured
            .push(element);
        Ok(())
    }

    /// Alignment completion rule: every non-finished channel of every input
    /// has delivered its barrier, and, for a terminating savepoint, every
    /// source-backed input has drained.
    pub fn is_fully_aligned(&self, finished: &[Vec<bool>]) -> bool {
        for (input_index, input) in self.inputs.iter().enumerate() {
            for (channel_index, channel) in input.channels.iter().enumerate() {
                if finished[input_index][channel_index] {
                    continue;
                }
                if !channel.barrier_received {
                    return false;
                }
            }
            if self.options.kind.is_terminating() && input.is_source_backed && !input.drained {
                return false;
            }
        }
        true
    }

    /// Drain the accumulated per-channel captures for the snapshot.
    pub fn take_channel_state(&mut self) -> Vec<ChannelStateCapture<T>> {
        let mut captures = Vec::new();
        for (input_index, input) in self.inputs.iter_mut().enumerate() {
            for (channel_index, channel) in input.channels.iter_mut().enumerate() {
                if channel.captured.is_empty() {
                    continue;
                }
                captures.push(ChannelStateCapture {
                    channel: ChannelRef::new(input_index, channel_index),
                    elements: std::mem::take(&mut channel.captured),
                });
            }
        }
        captures
    }
}
