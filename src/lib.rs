//! NetShield Core Library
//!
//! Network telemetry capture with classification and threat alerting.

pub mod api;
pub mod constants;
pub mod logic;
