//! Shared types and error hierarchy for Tollgate.

pub mod action;
pub mod error;
pub mod runtime;

pub use action::{Action, SHELL_TOOL};
pub use error::{ConfigError, RuntimeError};
pub use runtime::*;
