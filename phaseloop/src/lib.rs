//! Phase-driven control layer for an autonomous coding agent.
//!
//! A task moves through `init → analyze → plan → implement → verify → complete`
//! (or `escalate`) while an adaptive step budget watches the action history for
//! loops. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (facts, loop detection, phase
//!   machine, budget). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, task snapshots, briefing
//!   templates).
//!
//! [`session`] owns one task's state and [`looping`] drives it against an
//! [`looping::Agent`].

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
