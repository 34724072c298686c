//! Process-level helpers: logging set-up and exit guards.

pub mod guard;
pub mod logger;
