//! Session orchestration for Tollgate.
//!
//! Drives one agent-runtime turn at a time, answering the runtime's tool
//! authorization hook with the permission engine, the approval correlator
//! and the audit log.

mod session;

pub use session::{SYSTEM_PROMPT_FILE, Session, SessionEvent, SessionOptions, TurnState};
