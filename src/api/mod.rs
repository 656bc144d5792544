//! API Module
//!
//! Structure:
//! - commands.rs: Controller operations with serializable errors
//! - rpc.rs: JSON-lines request/response surface used by the daemon

pub mod commands;
pub mod rpc;

pub use commands::*;
