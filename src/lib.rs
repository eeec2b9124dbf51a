// Public API - configuration, wire codec, correlation, and session state
pub mod cli;
pub mod config;
pub mod error;
pub mod probe;
pub mod state;
pub mod trace;
