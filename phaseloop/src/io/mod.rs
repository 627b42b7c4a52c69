//! Side-effecting helpers: configuration, task snapshots and briefing rendering.

pub mod config;
pub mod prompt;
pub mod task_state;
