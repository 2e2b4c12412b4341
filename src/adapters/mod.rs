//! Adapters module: ways of reaching the runtime.
//!
//! Each adapter implements the [`Channel`] trait for uniform handling.
//!
//! # Supported Channels
//!
//! - **HTTP**: hosting-platform contract (`/invocations`, `/ping`) via axum
//! - **CLI**: one-shot invocation from the command line

pub mod cli;
pub mod http;

/// Channel trait for runtime front-ends.
///
/// All channel implementations must be [`Send`] + [`Sync`] for async compatibility.
pub trait Channel: Send + Sync {
    /// Channel name (e.g., "http", "cli").
    fn name(&self) -> &str;

    /// Start serving; returns when the channel is done.
    fn start(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;

    /// Stop the channel.
    fn stop(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;
}
