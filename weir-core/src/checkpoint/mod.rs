//! Per-task checkpoint machinery: alignment state and the barrier handler.

use crate::mailbox::CheckpointPromise;
use crate::state::ChannelStateCapture;
use crate::types::{
    AlignmentMode, Barrier, ChannelRef, CheckpointId, CheckpointMetadata, CheckpointOptions,
    EventTime, StopMode, StreamElement,
};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

mod alignment;
mod events;
mod handler;

pub use alignment::*;
pub use events::*;
pub use handler::*;

#[cfg(test)]
#[path = "tests/alignment_tests.rs"]
mod alignment_tests;

#[cfg(test)]
#[path = "tests/handler_tests.rs"]
mod handler_tests;
