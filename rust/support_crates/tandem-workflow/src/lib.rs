//! Coordination primitives for concurrent task execution.
//!
//! Every primitive in this crate blocks the calling thread; none of them requires an async
//! runtime. Blocking calls accept a [`signal::Deadline`] (or an optional timeout) and report
//! expiry as a distinguishable `TimedOut` error without side effects.
//!
//! # Key Components
//!
//! ## Channels
//!
//! - [`bounded_queue`] - Fixed-capacity multi-producer, multi-consumer FIFO queue with explicit
//!   close, non-blocking and deadline-bounded variants. Capacity 0 is a rendezvous.
//! - [`oneshot`] - Single-value reply port with a commit protocol, so a replier can tell
//!   whether the requester is still waiting.
//!
//! ## Signals and Time
//!
//! - [`signal`] - [`signal::Notifier`], [`signal::CancellationToken`] and [`signal::Deadline`].
//! - [`timer`] - Periodic [`timer::Ticker`] and one-shot [`timer::Timer`].
//!
//! ## Coordination
//!
//! - [`multiplex`] - `wait_first`: block until whichever of several sources resolves first.
//! - [`completion`] - [`completion::CompletionTracker`], a counting wait primitive.
//! - [`context`] - [`context::RuntimeContext`], the explicitly owned configuration and
//!   shutdown scope handed to every component.

pub mod bounded_queue;
pub mod completion;
pub mod context;
pub mod multiplex;
pub mod oneshot;
pub mod signal;
pub mod timer;
