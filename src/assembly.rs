//! Chunk request scheduling and reply integration.
//!
//! An assembling item runs an [`AssemblyScheduler`] loop that keeps a bounded
//! number of chunk requests in flight, rarest chunks first, spread across
//! the peers holding them. Replies arrive in two halves (metadata and data)
//! that the [`ReplyCorrelationCache`] pairs up by source peer and sequence
//! number; [`handle_incoming_chunk_reply`] then writes the chunk and wakes
//! the scheduler.
//!
//! # Components
//!
//! - [`ChunkRequestTracker`] - Outstanding requests of one item
//! - [`plan_requests`] - Picks the next batch of requests
//! - [`AssemblyScheduler`] - The per-item assembly loop
//! - [`ReplyCorrelationCache`] - Pairs split replies
//! - [`handle_incoming_chunk_reply`] - Applies a merged reply

mod correlation;
mod error;
mod integrator;
mod planner;
mod scheduler;
mod tracker;

pub use correlation::{CompletedReply, MergeState, ReplyCorrelationCache};
pub use error::AssemblyError;
pub use integrator::{handle_incoming_chunk_reply, IntegrationOutcome};
pub use planner::{plan_requests, PlanLimits, PlannedRequest};
pub use scheduler::{AssemblyOutcome, AssemblyScheduler};
pub use tracker::{ChunkRequest, ChunkRequestTracker};
