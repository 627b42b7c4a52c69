//! Deterministic, pure logic for the phase/loop/budget core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data owned by a single task and return deterministic outputs suitable for
//! tests.

pub mod budget;
pub mod extract;
pub mod facts;
pub mod loop_detector;
pub mod phase;
pub mod types;
