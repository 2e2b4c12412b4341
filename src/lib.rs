//! gateway-agent - token-gated agent runtime for an MCP tool gateway
//!
//! Each invocation obtains an OAuth2 machine-to-machine token, opens a
//! tool session against the gateway with it, lets the model answer using
//! the gateway's tools, and closes the session on every exit path.

pub mod adapters;
pub mod agent;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod runtime;
pub mod time_lookup;
pub mod ui;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use runtime::AgentRuntime;
