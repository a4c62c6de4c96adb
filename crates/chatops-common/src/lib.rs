//! Shared domain types for the chatops command engine.
//!
//! These types cross every boundary in the system: the parser produces a
//! [`ParsedIntent`], the store persists a [`Job`], and the HTTP/WebSocket
//! layers serialize both unchanged.

pub mod intent;
pub mod job;

pub use intent::{Action, Environment, IntentSource, MAX_REPLICAS, ParsedIntent, Slot, SlotOverrides};
pub use job::{Job, JobFilter, JobStatus, JobUpdate, TransitionError};
