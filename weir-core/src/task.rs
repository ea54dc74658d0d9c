//! The task execution loop: a single-threaded cooperative scheduler over
//! network channels and chained sources.
//!
//! Each step selects one ready, non-blocked input (round-robin), pulls
//! exactly one unit, and delivers it either to the operator chain (records,
//! watermarks, latency markers) or to the barrier handler (barriers,
//! end-of-data, end-of-partition). External actions queued in the mailbox are
//! drained between steps, in arrival order, never preempting a step.
//!
//! ```text
//! loop {
//!     drain mailbox (triggers, coordinator notifications)
//!     fire alignment timeout if due
//!     (channel, element) = next ready unblocked input   // fair round-robin
//!     match element {
//!         Record / Watermark / LatencyMarker => operator chain -> writer
//!         Barrier / EndOfData / EndOfPartition => barrier handler -> actions
//!     }
//! }
//! ```
//!
//! Blocking is purely logical: an aligned-mode channel stops being scheduled
//! while the thread keeps servicing the others.

use crate::channel::LocalChannelReceiver;
use crate::checkpoint::{
    CheckpointAction, CheckpointBarrierHandler, InputDescriptor, TaskCheckpointEvent,
};
use crate::mailbox::{CheckpointFuture, Mailbox, MailboxHandle, TaskMail};
use crate::output::ResultPartitionWriter;
use crate::source::SourceInput;
use crate::state::{SnapshotContents, TaskStateManager};
use crate::types::{
    ChannelRef, CheckpointId, CheckpointMetadata, CheckpointOptions, StopMode, StreamElement,
    StreamRecord, Watermark,
};
use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Select};
use std::time::{Duration, Instant};

/// Chain of operators executed by this task. Business logic is external to
/// the checkpoint core; the loop only needs these entry points.
pub trait OperatorChain<T> {
    /// Process one record from the given logical input, collecting outputs.
    fn process_record(
        &mut self,
        input_index: usize,
        record: StreamRecord<T>,
        out: &mut Vec<StreamRecord<T>>,
    ) -> Result<()>;

    /// Observe a watermark from the given logical input.
    fn process_watermark(&mut self, _input_index: usize, _watermark: Watermark) -> Result<()> {
        Ok(())
    }

    /// All inputs delivered their last record; emit any final output.
    fn finish(&mut self, _out: &mut Vec<StreamRecord<T>>) -> Result<()> {
        Ok(())
    }

    /// Snapshot operator state for a checkpoint.
    fn snapshot_state(&mut self) -> Result<Vec<u8>>;
}

/// One logical input of a task: network-fed channels from upstream peers, or
/// a chained source pulled locally. Both are consumed through the same
/// poll-one-unit capability.
pub enum TaskInput<T> {
    Network(Vec<LocalChannelReceiver<T>>),
    Source(SourceInput<T>),
}

impl<T> TaskInput<T> {
    pub fn network(channels: Vec<LocalChannelReceiver<T>>) -> Self {
        TaskInput::Network(channels)
    }

    pub fn source(source: SourceInput<T>) -> Self {
        TaskInput::Source(source)
    }

    fn num_channels(&self) -> usize {
        match self {
            TaskInput::Network(channels) => channels.len(),
            TaskInput::Source(_) => 1,
        }
    }
}

/// Poll interval while an unexhausted source may produce data and no channel
/// activity wakes the loop.
const SOURCE_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Idle wait when only channel or mailbox activity can make progress.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// The per-task execution unit: owns the input loop, the barrier handler and
/// the collaborator handles.
pub struct StreamTask<T, Op, W, S> {
    inputs: Vec<TaskInput<T>>,
    /// Flattened scheduling order over all (input, channel) pairs.
    channel_order: Vec<ChannelRef>,
    rr_cursor: usize,
    /// Channels the handler told us not to schedule (aligned-mode blocking).
    blocked: Vec<Vec<bool>>,
    /// Channels that will never yield another element.
    retired: Vec<Vec<bool>>,
    /// Channels past their end-of-data marker.
    data_finished: Vec<Vec<bool>>,
    saw_no_drain: bool,
    end_of_data_broadcast: bool,
    finished_on_restore: bool,
    fast_path_done: bool,
    handler: CheckpointBarrierHandler<T>,
    mailbox: Mailbox,
    event_rx: Receiver<TaskCheckpointEvent>,
    operator: Op,
    writer: W,
    state_manager: S,
    out_buf: Vec<StreamRecord<T>>,
}

impl<T, Op, W, S> StreamTask<T, Op, W, S>
where
    T: Clone,
    Op: OperatorChain<T>,
    W: ResultPartitionWriter<T>,
    S: TaskStateManager<T>,
{
    pub fn new(inputs: Vec<TaskInput<T>>, operator: Op, writer: W, state_manager: S) -> Self {
        let layout: Vec<InputDescriptor> = inputs
            .iter()
            .map(|input| match input {
                TaskInput::Network(channels) => InputDescriptor::network(channels.len()),
                TaskInput::Source(_) => InputDescriptor::source(),
            })
            .collect();
        let channel_order: Vec<ChannelRef> = inputs
            .iter()
            .enumerate()
            .flat_map(|(input_index, input)| {
                (0..input.num_channels()).map(move |channel_index| {
                    ChannelRef::new(input_index, channel_index)
                })
            })
            .collect();
        let blocked = layout.iter().map(|d| vec![false; d.num_channels]).collect();
        let retired = layout.iter().map(|d| vec![false; d.num_channels]).collect();
        let data_finished = layout.iter().map(|d| vec![false; d.num_channels]).collect();

        let (event_tx, event_rx) = unbounded();
        let handler = CheckpointBarrierHandler::new(layout, event_tx);

        Self {
            inputs,
            channel_order,
            rr_cursor: 0,
            blocked,
            retired,
            data_finished,
            saw_no_drain: false,
            end_of_data_broadcast: false,
            finished_on_restore: false,
            fast_path_done: false,
            handler,
            mailbox: Mailbox::new(),
            event_rx,
            operator,
            writer,
            state_manager,
            out_buf: Vec::new(),
        }
    }

    /// Restore with the persisted "finished on restore" marker set: skip all
    /// input processing and source lifecycle, only emit terminal markers.
    pub fn with_finished_on_restore(mut self, finished_on_restore: bool) -> Self {
        self.finished_on_restore = finished_on_restore;
        self
    }

    /// Bound the unaligned capture buffer (elements per checkpoint).
    pub fn with_capture_limit(mut self, capture_limit: usize) -> Self {
        self.handler = self.handler.with_capture_limit(capture_limit);
        self
    }

    /// Handle for the RPC boundary: triggers and coordinator notifications.
    pub fn mailbox_handle(&self) -> MailboxHandle {
        self.mailbox.handle()
    }

    /// Stream of checkpoint acks/aborts this task reports.
    pub fn checkpoint_events(&self) -> Receiver<TaskCheckpointEvent> {
        self.event_rx.clone()
    }

    pub fn barrier_handler(&self) -> &CheckpointBarrierHandler<T> {
        &self.handler
    }

    pub fn is_channel_blocked(&self, channel: ChannelRef) -> bool {
        self.blocked[channel.input_index][channel.channel_index]
    }

    /// Convenience wrapper over the mailbox handle.
    pub fn trigger_checkpoint_async(
        &self,
        metadata: CheckpointMetadata,
        options: CheckpointOptions,
    ) -> CheckpointFuture {
        self.mailbox_handle().trigger_checkpoint_async(metadata, options)
    }

    pub fn notify_checkpoint_complete_async(&self, checkpoint_id: CheckpointId) {
        self.mailbox_handle().notify_checkpoint_complete_async(checkpoint_id)
    }

    pub fn notify_checkpoint_abort_async(&self, checkpoint_id: CheckpointId) {
        self.mailbox_handle().notify_checkpoint_abort_async(checkpoint_id)
    }

    /// Lifecycle counters of a chained source, for call-count assertions.
    pub fn source_monitor(&self, input_index: usize) -> Option<crate::source::LifeCycleMonitor> {
        match &self.inputs[input_index] {
            TaskInput::Source(source) => Some(source.monitor()),
            TaskInput::Network(_) => None,
        }
    }

    /// Whether the task has nothing left to do.
    pub fn is_finished(&self) -> bool {
        if self.finished_on_restore {
            return self.fast_path_done;
        }
        self.all_retired() && !self.handler.is_collecting()
    }

    fn all_retired(&self) -> bool {
        self.retired.iter().all(|row| row.iter().all(|r| *r))
    }

    /// Perform one cooperative step. Returns whether any progress was made
    /// (mail handled, timer fired, or one unit delivered).
    pub fn process_single_step(&mut self) -> Result<bool> {
        if self.finished_on_restore {
            if self.fast_path_done {
                return Ok(false);
            }
            self.run_finished_on_restore()?;
            self.fast_path_done = true;
            return Ok(true);
        }

        let mut progressed = false;
        while let Some(mail) = self.mailbox.try_take() {
            self.handle_mail(mail)?;
            progressed = true;
        }

        let timeout_actions = self.handler.poll_alignment_timeout(Instant::now());
        if !timeout_actions.is_empty() {
            self.execute_actions(timeout_actions)?;
            progressed = true;
        }

        if let Some((channel, element)) = self.poll_next_element()? {
            self.dispatch(channel, element)?;
            progressed = true;
        }
        Ok(progressed)
    }

    /// Step until nothing is ready anymore.
    pub fn process_all(&mut self) -> Result<()> {
        while self.process_single_step()? {}
        Ok(())
    }

    /// Step until `condition` holds, at most `max_steps` times. Returns
    /// whether the condition was met.
    pub fn process_until(
        &mut self,
        max_steps: usize,
        mut condition: impl FnMut() -> bool,
    ) -> Result<bool> {
        for _ in 0..max_steps {
            if condition() {
                return Ok(true);
            }
            self.process_single_step()?;
        }
        Ok(condition())
    }

    /// Run to completion: all channels exhausted and no checkpoint in flight.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let progressed = self.process_single_step()?;
            if self.is_finished() && self.mailbox_is_empty() {
                return Ok(());
            }
            if !progressed {
                self.wait_for_work();
            }
        }
    }

    fn mailbox_is_empty(&self) -> bool {
        self.mailbox.receiver().is_empty()
    }

    /// Emit the terminal markers for a task that had already logically
    /// finished before this execution attempt. No source lifecycle call is
    /// made and no input element is accepted.
    fn run_finished_on_restore(&mut self) -> Result<()> {
        self.writer.broadcast_watermark(Watermark::MAX)?;
        self.writer.broadcast_end_of_data(StopMode::Drain)?;
        Ok(())
    }

    fn handle_mail(&mut self, mail: TaskMail) -> Result<()> {
        match mail {
            TaskMail::TriggerCheckpoint {
                metadata,
                options,
                promise,
            } => {
                let actions = self.handler.trigger_checkpoint(metadata, options, promise);
                self.execute_actions(actions)
            }
            TaskMail::NotifyCheckpointComplete(id) => {
                self.handler.notify_checkpoint_complete(id);
                Ok(())
            }
            TaskMail::NotifyCheckpointAbort(id) => {
                self.handler.notify_checkpoint_abort(id);
                Ok(())
            }
        }
    }

    /// Fair selection: try each non-blocked, non-retired channel once,
    /// starting after the last scheduled one.
    fn poll_next_element(&mut self) -> Result<Option<(ChannelRef, StreamElement<T>)>> {
        let total = self.channel_order.len();
        if total == 0 {
            return Ok(None);
        }
        for step in 0..total {
            let idx = (self.rr_cursor + step) % total;
            let channel = self.channel_order[idx];
            if self.blocked[channel.input_index][channel.channel_index]
                || self.retired[channel.input_index][channel.channel_index]
            {
                continue;
            }
            let polled = match &mut self.inputs[channel.input_index] {
                TaskInput::Network(channels) => channels[channel.channel_index].try_recv()?,
                TaskInput::Source(source) => {
                    let element = source.poll_next()?;
                    if element.is_none() && source.is_exhausted() {
                        self.retired[channel.input_index][channel.channel_index] = true;
                        source.close()?;
                    }
                    element
                }
            };
            if let Some(element) = polled {
                self.rr_cursor = (idx + 1) % total;
                return Ok(Some((channel, element)));
            }
        }
        Ok(None)
    }

    fn dispatch(&mut self, channel: ChannelRef, element: StreamElement<T>) -> Result<()> {
        match element {
            StreamElement::Record(record) => {
                let actions = self
                    .handler
                    .on_element(channel, &StreamElement::Record(record.clone()));
                self.execute_actions(actions)?;

                self.out_buf.clear();
                self.operator
                    .process_record(channel.input_index, record, &mut self.out_buf)?;
                let outputs = std::mem::take(&mut self.out_buf);
                for output in outputs {
                    self.writer.emit(StreamElement::Record(output))?;
                }
            }
            StreamElement::Watermark(watermark) => {
                self.operator.process_watermark(channel.input_index, watermark)?;
                self.writer.broadcast_watermark(watermark)?;
            }
            StreamElement::LatencyMarker(marker) => {
                self.writer.emit(StreamElement::LatencyMarker(marker))?;
            }
            StreamElement::CheckpointBarrier(barrier) => {
                let actions = self.handler.on_barrier(channel, barrier);
                self.execute_actions(actions)?;
            }
            StreamElement::EndOfData(mode) => {
                self.data_finished[channel.input_index][channel.channel_index] = true;
                if mode == StopMode::NoDrain {
                    self.saw_no_drain = true;
                }
                let actions = self.handler.on_end_of_data(channel, mode);
                self.maybe_broadcast_end_of_data()?;
                self.execute_actions(actions)?;
            }
            StreamElement::EndOfPartition => {
                self.retired[channel.input_index][channel.channel_index] = true;
                self.data_finished[channel.input_index][channel.channel_index] = true;
                let actions = self.handler.on_end_of_partition(channel);
                self.maybe_broadcast_end_of_data()?;
                self.execute_actions(actions)?;
            }
        }
        Ok(())
    }

    /// Once every channel delivered its end-of-data marker: let the operator
    /// chain finish, then broadcast the aggregated end-of-data downstream.
    /// Happens before any pending terminal barrier goes out.
    fn maybe_broadcast_end_of_data(&mut self) -> Result<()> {
        if self.end_of_data_broadcast {
            return Ok(());
        }
        let all_finished = self
            .data_finished
            .iter()
            .all(|row| row.iter().all(|f| *f));
        if !all_finished {
            return Ok(());
        }
        self.end_of_data_broadcast = true;

        self.out_buf.clear();
        self.operator.finish(&mut self.out_buf)?;
        let outputs = std::mem::take(&mut self.out_buf);
        for output in outputs {
            self.writer.emit(StreamElement::Record(output))?;
        }
        let mode = if self.saw_no_drain {
            StopMode::NoDrain
        } else {
            StopMode::Drain
        };
        self.writer.broadcast_end_of_data(mode)
    }

    fn execute_actions(&mut self, actions: Vec<CheckpointAction<T>>) -> Result<()> {
        for action in actions {
            match action {
                CheckpointAction::BlockChannel(channel) => {
                    self.blocked[channel.input_index][channel.channel_index] = true;
                }
                CheckpointAction::UnblockAllChannels => {
                    for row in &mut self.blocked {
                        row.fill(false);
                    }
                }
                CheckpointAction::BroadcastBarrier(barrier) => {
                    self.writer.broadcast_barrier(barrier)?;
                }
                CheckpointAction::InjectSourceBarrier {
                    input_index,
                    barrier,
                } => {
                    if let TaskInput::Source(source) = &mut self.inputs[input_index] {
                        source.request_barrier_injection(barrier);
                    }
                }
                CheckpointAction::RequestSourceStop {
                    input_index,
                    barrier,
                } => {
                    if let TaskInput::Source(source) = &mut self.inputs[input_index] {
                        source.request_stop(barrier);
                    }
                }
                CheckpointAction::TakeSnapshot {
                    checkpoint_id,
                    channel_state,
                } => {
                    let (result, operator_state) = match self.operator.snapshot_state() {
                        Ok(operator_state) => {
                            let result = self.state_manager.snapshot(SnapshotContents {
                                checkpoint_id,
                                channel_state,
                                operator_state: operator_state.clone(),
                            });
                            (result, operator_state)
                        }
                        Err(err) => (Err(err), Vec::new()),
                    };
                    let follow_up =
                        self.handler
                            .finish_snapshot(checkpoint_id, result, operator_state);
                    self.execute_actions(follow_up)?;
                }
            }
        }
        Ok(())
    }

    /// Park until channel or mailbox activity, an alignment deadline, or the
    /// next source poll interval.
    fn wait_for_work(&self) {
        let mut select = Select::new();
        select.recv(self.mailbox.receiver());
        for channel in &self.channel_order {
            if self.blocked[channel.input_index][channel.channel_index]
                || self.retired[channel.input_index][channel.channel_index]
            {
                continue;
            }
            if let TaskInput::Network(channels) = &self.inputs[channel.input_index] {
                select.recv(&channels[channel.channel_index].receiver);
            }
        }

        let mut timeout = if self.has_pollable_source() {
            SOURCE_POLL_INTERVAL
        } else {
            IDLE_WAIT
        };
        if let Some(deadline) = self.handler.next_deadline() {
            timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
        }
        let _ = select.ready_timeout(timeout);
    }

    fn has_pollable_source(&self) -> bool {
        self.inputs.iter().enumerate().any(|(input_index, input)| {
            matches!(input, TaskInput::Source(source)
                if !source.is_exhausted() && !self.blocked[input_index][0])
        })
    }
}
