use super::*;

/// Default bound on elements captured as unaligned channel state per
/// checkpoint. The sink is pluggable via
/// [`CheckpointBarrierHandler::with_capture_limit`]; overflow aborts the
/// checkpoint instead of growing without bound.
const DEFAULT_CAPTURE_LIMIT: usize = 10_000;

/// Effect the barrier handler asks the task loop to perform.
///
/// The handler owns all alignment state but performs no I/O itself; the loop
/// interprets these actions against the writer, the state manager and the
/// source adapters, in order.
#[derive(Debug)]
pub enum CheckpointAction<T> {
    /// Stop scheduling this channel until `UnblockAllChannels`.
    BlockChannel(ChannelRef),
    /// Resume scheduling every blocked channel.
    UnblockAllChannels,
    /// Send the barrier to all downstream outputs.
    BroadcastBarrier(Barrier),
    /// Ask the source adapter of this input to place a barrier at its current
    /// output position.
    InjectSourceBarrier { input_index: usize, barrier: Barrier },
    /// Ask the source adapter of this input to drain and terminate, emitting
    /// `EndOfData(Drain)` and then the barrier.
    RequestSourceStop { input_index: usize, barrier: Barrier },
    /// Alignment is complete: snapshot now, then report the result back via
    /// [`CheckpointBarrierHandler::finish_snapshot`].
    TakeSnapshot {
        checkpoint_id: CheckpointId,
        channel_state: Vec<ChannelStateCapture<T>>,
    },
}

/// The central checkpoint state machine of one task.
///
/// Owns alignment state for all logical inputs, decides aligned-vs-unaligned
/// behavior, and decides when a snapshot may be taken. All entry points are
/// called on the single processing thread; external triggers arrive through
/// the task mailbox.
///
/// State machine per checkpoint id: `Collecting -> Aligned -> (reported)`,
/// with abort reachable from either on supersession, capture overflow or
/// snapshot failure.
pub struct CheckpointBarrierHandler<T> {
    layout: Vec<InputDescriptor>,
    /// Finished channels, persistent across checkpoints: a finished channel
    /// never blocks alignment again.
    finished: Vec<Vec<bool>>,
    /// Source-backed inputs that reached `EndOfData(Drain)`, persistent like
    /// `finished` so a later terminating savepoint sees the drain.
    drained: Vec<bool>,
    current: Option<TaskCheckpointState<T>>,
    /// Highest id ever completed or aborted; anything at or below is stale.
    last_cleared: CheckpointId,
    latest_completed: CheckpointId,
    capture_limit: usize,
    event_tx: Sender<TaskCheckpointEvent>,
}

impl<T: Clone> CheckpointBarrierHandler<T> {
    pub fn new(layout: Vec<InputDescriptor>, event_tx: Sender<TaskCheckpointEvent>) -> Self {
        let finished = layout.iter().map(|d| vec![false; d.num_channels]).collect();
        let drained = vec![false; layout.len()];
        Self {
            layout,
            finished,
            drained,
            current: None,
            last_cleared: 0,
            latest_completed: 0,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
            event_tx,
        }
    }

    pub fn with_capture_limit(mut self, capture_limit: usize) -> Self {
        self.capture_limit = capture_limit.max(1);
        self
    }

    pub fn is_collecting(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_checkpoint_id(&self) -> Option<CheckpointId> {
        self.current.as_ref().map(|s| s.checkpoint_id)
    }

    pub fn latest_completed_checkpoint_id(&self) -> CheckpointId {
        self.latest_completed
    }

    pub fn is_channel_finished(&self, channel: ChannelRef) -> bool {
        self.finished[channel.input_index][channel.channel_index]
    }

    /// Deadline the task loop must wake up for, if an aligned-with-timeout
    /// checkpoint is still collecting.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.current
            .as_ref()
            .filter(|s| !s.downgraded && !s.options.is_unaligned())
            .and_then(|s| s.align_deadline)
    }

    /// RPC-facing trigger. Resolves the promise to `false` without side
    /// effects when the id is stale, already collecting, or the options are
    /// invalid; otherwise starts collecting and may complete immediately if
    /// alignment is vacuously satisfied.
    pub fn trigger_checkpoint(
        &mut self,
        metadata: CheckpointMetadata,
        options: CheckpointOptions,
        promise: CheckpointPromise,
    ) -> Vec<CheckpointAction<T>> {
        if let AlignmentMode::AlignedWithTimeout(0) = options.alignment {
            tracing::warn!(
                checkpoint_id = metadata.checkpoint_id,
                "declining checkpoint: non-positive alignment timeout"
            );
            promise.complete(false);
            return Vec::new();
        }
        if metadata.checkpoint_id <= self.last_cleared {
            tracing::debug!(
                checkpoint_id = metadata.checkpoint_id,
                "declining stale checkpoint trigger"
            );
            promise.complete(false);
            return Vec::new();
        }
        let mut actions = Vec::new();
        if let Some(current_id) = self.current_checkpoint_id() {
            if current_id >= metadata.checkpoint_id {
                promise.complete(false);
                return Vec::new();
            }
            // A higher id supersedes the in-flight collection.
            self.abort_current(format!(
                "superseded by checkpoint {}",
                metadata.checkpoint_id
            ));
            actions.push(CheckpointAction::UnblockAllChannels);
        }

        actions.extend(self.start_collection(
            metadata.checkpoint_id,
            metadata.timestamp,
            options,
            Some(promise),
        ));
        actions.extend(self.maybe_complete());
        actions
    }

    /// Called inline by the loop when a barrier is read off a channel.
    pub fn on_barrier(&mut self, channel: ChannelRef, barrier: Barrier) -> Vec<CheckpointAction<T>> {
        if barrier.checkpoint_id <= self.last_cleared {
            tracing::debug!(
                checkpoint_id = barrier.checkpoint_id,
                channel = %channel,
                "discarding stale barrier"
            );
            return Vec::new();
        }

        let mut actions = Vec::new();
        let needs_new_collection = match self.current_checkpoint_id() {
            None => true,
            Some(current_id) if barrier.checkpoint_id > current_id => {
                self.abort_current(format!("superseded by barrier {}", barrier.checkpoint_id));
                actions.push(CheckpointAction::UnblockAllChannels);
                true
            }
            Some(current_id) if barrier.checkpoint_id < current_id => {
                tracing::debug!(
                    checkpoint_id = barrier.checkpoint_id,
                    current = current_id,
                    "discarding barrier below current collection"
                );
                return actions;
            }
            Some(_) => false,
        };
        if needs_new_collection {
            actions.extend(self.start_collection(
                barrier.checkpoint_id,
                barrier.timestamp,
                barrier.options,
                None,
            ));
        }

        let state = self.current.as_mut().expect("collection just ensured");
        if !state.mark_barrier(channel) {
            tracing::debug!(
                checkpoint_id = barrier.checkpoint_id,
                channel = %channel,
                "duplicate barrier"
            );
            return actions;
        }

        let channel_finished = self.finished[channel.input_index][channel.channel_index];
        if state.blocks_on_alignment() {
            if !channel_finished {
                actions.push(CheckpointAction::BlockChannel(channel));
            }
        } else if !state.barrier_broadcast {
            // Unaligned (or downgraded): propagate on first arrival.
            state.barrier_broadcast = true;
            actions.push(CheckpointAction::BroadcastBarrier(state.barrier()));
        }

        actions.extend(self.maybe_complete());
        actions
    }

    /// A channel delivered `EndOfData`; it is excluded from alignment for all
    /// current and future checkpoints. Duplicate markers are no-ops.
    pub fn on_end_of_data(&mut self, channel: ChannelRef, mode: StopMode) -> Vec<CheckpointAction<T>> {
        if self.finished[channel.input_index][channel.channel_index] {
            return Vec::new();
        }
        self.finished[channel.input_index][channel.channel_index] = true;

        if self.layout[channel.input_index].source_backed && mode == StopMode::Drain {
            self.drained[channel.input_index] = true;
            if let Some(state) = self.current.as_mut() {
                state.mark_drained(channel.input_index);
            }
        }
        self.maybe_complete()
    }

    /// A channel is fully exhausted. Duplicate markers are no-ops.
    pub fn on_end_of_partition(&mut self, channel: ChannelRef) -> Vec<CheckpointAction<T>> {
        if self.finished[channel.input_index][channel.channel_index] {
            return Vec::new();
        }
        self.finished[channel.input_index][channel.channel_index] = true;
        self.maybe_complete()
    }

    /// Observe a data element on `channel`. When an unaligned checkpoint is
    /// in flight and this channel has not yet delivered its barrier, the
    /// element is captured into the channel's snapshot state (exactly once);
    /// it is still forwarded to the operator chain by the loop.
    pub fn on_element(
        &mut self,
        channel: ChannelRef,
        element: &StreamElement<T>,
    ) -> Vec<CheckpointAction<T>> {
        let capture = self
            .current
            .as_ref()
            .is_some_and(|s| s.should_capture(channel, &self.finished));
        if !capture {
            return Vec::new();
        }

        let limit = self.capture_limit;
        let state = self.current.as_mut().expect("checked above");
        if state.capture(channel, element.clone(), limit).is_err() {
            let id = state.checkpoint_id;
            tracing::warn!(checkpoint_id = id, "capture buffer overflow, aborting");
            self.abort_current("capture buffer overflow".to_string());
            return vec![CheckpointAction::UnblockAllChannels];
        }
        Vec::new()
    }

    /// Downgrade an aligned-with-timeout checkpoint whose deadline passed:
    /// the barrier goes downstream now, already-blocked channels resume (the
    /// barrier is ahead of anything they will deliver), and the remaining
    /// unaligned channels switch to capture mode in place.
    pub fn poll_alignment_timeout(&mut self, now: Instant) -> Vec<CheckpointAction<T>> {
        let Some(state) = self.current.as_mut() else {
            return Vec::new();
        };
        if state.downgraded || state.options.is_unaligned() {
            return Vec::new();
        }
        let Some(deadline) = state.align_deadline else {
            return Vec::new();
        };
        if now < deadline {
            return Vec::new();
        }

        tracing::warn!(
            checkpoint_id = state.checkpoint_id,
            "alignment timed out, switching remaining channels to unaligned"
        );
        state.downgraded = true;
        state.align_deadline = None;
        let mut actions = Vec::new();
        if !state.barrier_broadcast {
            state.barrier_broadcast = true;
            actions.push(CheckpointAction::BroadcastBarrier(state.barrier()));
        }
        actions.push(CheckpointAction::UnblockAllChannels);
        actions
    }

    /// Report the snapshot outcome for a `TakeSnapshot` action. On success
    /// the barrier is broadcast (aligned mode) or confirmed (unaligned mode),
    /// channels are released and the checkpoint is acknowledged; on failure
    /// the checkpoint aborts and the task keeps running.
    pub fn finish_snapshot(
        &mut self,
        checkpoint_id: CheckpointId,
        result: anyhow::Result<()>,
        operator_state: Vec<u8>,
    ) -> Vec<CheckpointAction<T>> {
        let matches_current = self
            .current
            .as_ref()
            .is_some_and(|s| s.checkpoint_id == checkpoint_id);
        if !matches_current {
            return Vec::new();
        }

        match result {
            Ok(()) => {
                let mut state = self.current.take().expect("checked above");
                let mut actions = Vec::new();
                if !state.barrier_broadcast {
                    actions.push(CheckpointAction::BroadcastBarrier(state.barrier()));
                }
                actions.push(CheckpointAction::UnblockAllChannels);

                if let Some(promise) = state.promise.take() {
                    promise.complete(true);
                }
                let _ = self.event_tx.send(TaskCheckpointEvent::Ack(TaskCheckpointAck {
                    checkpoint_id,
                    operator_state,
                }));
                self.latest_completed = checkpoint_id;
                self.last_cleared = self.last_cleared.max(checkpoint_id);
                actions
            }
            Err(err) => {
                tracing::warn!(checkpoint_id, error = %err, "snapshot failed, aborting checkpoint");
                self.abort_current(format!("snapshot failed: {err}"));
                vec![CheckpointAction::UnblockAllChannels]
            }
        }
    }

    /// Inbound coordinator acknowledgments. Bookkeeping only; they never
    /// drive alignment.
    pub fn notify_checkpoint_complete(&mut self, checkpoint_id: CheckpointId) {
        tracing::debug!(checkpoint_id, "coordinator confirmed checkpoint");
    }

    pub fn notify_checkpoint_abort(&mut self, checkpoint_id: CheckpointId) {
        tracing::debug!(checkpoint_id, "coordinator aborted checkpoint");
    }

    fn start_collection(
        &mut self,
        checkpoint_id: CheckpointId,
        timestamp: EventTime,
        options: CheckpointOptions,
        promise: Option<CheckpointPromise>,
    ) -> Vec<CheckpointAction<T>> {
        let mut state = TaskCheckpointState::new(checkpoint_id, timestamp, options, &self.layout);
        state.promise = promise;
        // Drains observed before this collection started still count.
        for (input_index, drained) in self.drained.iter().enumerate() {
            if *drained {
                state.mark_drained(input_index);
            }
        }
        let barrier = state.barrier();

        let mut actions = Vec::new();
        if options.is_unaligned() {
            state.barrier_broadcast = true;
            actions.push(CheckpointAction::BroadcastBarrier(barrier));
        }
        // Source-backed inputs have no upstream to deliver a barrier; ask the
        // adapter to originate one (or to drain for a terminating savepoint).
        for (input_index, desc) in self.layout.iter().enumerate() {
            if !desc.source_backed || self.finished[input_index][0] {
                continue;
            }
            if options.kind.is_terminating() {
                actions.push(CheckpointAction::RequestSourceStop {
                    input_index,
                    barrier,
                });
            } else {
                actions.push(CheckpointAction::InjectSourceBarrier {
                    input_index,
                    barrier,
                });
            }
        }

        self.current = Some(state);
        actions
    }

    fn maybe_complete(&mut self) -> Vec<CheckpointAction<T>> {
        let aligned = self
            .current
            .as_ref()
            .is_some_and(|s| s.status == CheckpointStatus::Collecting && s.is_fully_aligned(&self.finished));
        if !aligned {
            return Vec::new();
        }
        let state = self.current.as_mut().expect("checked above");
        state.status = CheckpointStatus::Aligned;
        let checkpoint_id = state.checkpoint_id;
        let channel_state = state.take_channel_state();
        vec![CheckpointAction::TakeSnapshot {
            checkpoint_id,
            channel_state,
        }]
    }

    fn abort_current(&mut self, reason: String) {
        let Some(mut state) = self.current.take() else {
            return;
        };
        state.status = CheckpointStatus::Aborted;
        if let Some(promise) = state.promise.take() {
            promise.complete(false);
        }
        let _ = self
            .event_tx
            .send(TaskCheckpointEvent::Aborted(TaskCheckpointAbort {
                checkpoint_id: state.checkpoint_id,
                reason,
            }));
        self.last_cleared = self.last_cleared.max(state.checkpoint_id);
    }
}
