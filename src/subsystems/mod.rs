//! Subsystem modules for the conversation runtime.

pub mod chat;
pub mod memory;
pub mod runtime;
