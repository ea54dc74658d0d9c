//! # Weir Core
//!
//! Per-task checkpoint alignment engine for a stream processing runtime.
//!
//! A task reads from multiple logical inputs, each either a set of network
//! channels fed by upstream peers or a chained source polled locally, on a
//! single cooperative thread. This crate provides the pieces that make
//! consistent distributed snapshots work across those inputs:
//!
//! - [`types`] — Core data types: [`StreamElement`](types::StreamElement),
//!   [`StreamRecord`](types::StreamRecord), [`Barrier`](types::Barrier),
//!   [`CheckpointOptions`](types::CheckpointOptions).
//! - [`channel`] — Bounded in-process channels carrying stream elements.
//! - [`source`] — The chained-source adapter: barrier injection and
//!   stop-with-drain, plus lifecycle accounting.
//! - [`checkpoint`] — Alignment state and the
//!   [`CheckpointBarrierHandler`](checkpoint::CheckpointBarrierHandler) state
//!   machine: aligned, unaligned, timeout-downgrade and terminating
//!   savepoints.
//! - [`mailbox`] — The external action queue: checkpoint triggers and
//!   coordinator notifications, with one-shot result futures.
//! - [`output`] — Result partition writers: broadcast and collecting.
//! - [`state`] — Snapshot reporting: channel state captures and the
//!   [`TaskStateManager`](state::TaskStateManager) seam.
//! - [`task`] — The [`StreamTask`](task::StreamTask) input loop tying it all
//!   together.

pub mod channel;
pub mod checkpoint;
pub mod mailbox;
pub mod output;
pub mod source;
pub mod state;
pub mod task;
pub mod types;

#[cfg(test)]
#[path = "tests/task_tests.rs"]
mod task_tests;
