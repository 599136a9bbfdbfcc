//! StackGuard: dangerous-action confirmation for cloud-orchestration tool calls.
//!
//! Intercepts tool calls, validates and rate-limits them, and holds back
//! destructive operations until a human types the right confirmation phrase.
//! Single-process and in-memory: nothing survives a restart.

pub mod actions;
pub mod audit;
pub mod config;
pub mod confirmation;
pub mod guard;
pub mod protocol;
pub mod validation;
