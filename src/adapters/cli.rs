//! CLI adapter: one-shot invocation from the command line.

use std::sync::Arc;

use crate::agent::InvocationPayload;
use crate::runtime::AgentRuntime;
use crate::{ui, Result};

/// Runs a single payload through the runtime and prints the answer.
pub struct CliChannel {
    runtime: Arc<AgentRuntime>,
    payload: InvocationPayload,
}

impl CliChannel {
    pub fn new(runtime: Arc<AgentRuntime>, payload: InvocationPayload) -> Self {
        Self { runtime, payload }
    }

    /// Run the payload and return the answer without printing it.
    pub async fn run_once(&self) -> Result<String> {
        Ok(self.runtime.handle(&self.payload).await?)
    }
}

impl super::Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    fn start(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send {
        async move {
            ui::print_thinking(self.payload.prompt());
            match self.run_once().await {
                Ok(answer) => {
                    ui::print_answer(&answer);
                    Ok(())
                }
                Err(e) => {
                    ui::print_error(&e.to_string());
                    Err(e)
                }
            }
        }
    }

    fn stop(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send {
        async { Ok(()) }
    }
}
