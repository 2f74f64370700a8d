//! Autonomous coding agent driven by an external reasoning model.
//!
//! A run repeatedly asks the model for its next action and executes the
//! requested tools inside a workspace until the model calls `finish_task` or a
//! human stops it. Risky tools pause at a confirmation gate for a human
//! approve/deny; failed tools are fed back to the model as a corrective prompt.
//!
//! - **[`core`]**: Pure, deterministic types (transcript, run state, correction
//!   policy). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, documents, model transport,
//!   prompts, retrieval, processes).
//! - **[`tools`]**: The tool registry and built-in tools.
//!
//! Orchestration modules ([`step`], [`looping`], [`controller`]) tie them
//! together; [`gate`] holds the synchronization primitives and [`console`]
//! the terminal's confirmation bookkeeping.

pub mod console;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod looping;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
