//! Router Module
//!
//! Handles credential rotation and per-backend load accounting.

pub mod agents;
pub mod backend;
pub mod token_pool;

pub use agents::{AgentRouter, AgentStats, DispatchParams, DispatchResult, Generation, TextGenerator};
pub use backend::BackendKind;
pub use token_pool::{Token, TokenLease, TokenPool, TokenPoolStats, TokenStatus};
