//! Security checks applied to every line before it is dispatched.
//!
//! The filters here are pure classifiers: they look at a string and report.
//! Enforcement happens in the Security Agent and in [`gate::gate_command`].

mod command_safety;
mod fallback;
pub mod gate;
mod sensitive;

pub use command_safety::CommandSafetyFilter;
pub use fallback::{FallbackGuard, FallbackHit};
pub use gate::{ExecutionDecision, gate_command};
pub use sensitive::{SensitiveDataFilter, SensitiveKind, SensitivityFinding};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSafety {
    Safe,
    Warn(String),  // needs confirmation
    Block(String), // forbid execution
}
