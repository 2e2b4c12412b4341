//! gateway-agent CLI entry point

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gateway_agent::adapters::cli::CliChannel;
use gateway_agent::adapters::http::HttpChannel;
use gateway_agent::adapters::Channel;
use gateway_agent::agent::InvocationPayload;
use gateway_agent::{config, time_lookup, ui, AgentRuntime};

#[derive(Parser)]
#[command(name = "gateway-agent")]
#[command(about = "Token-gated agent that answers with tools from an MCP gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the invocation contract over HTTP
    Serve {
        /// Listen port (defaults to PORT or 8080)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single invocation and print the answer
    Invoke {
        /// Prompt to send to the agent
        #[arg(short, long, conflicts_with = "payload")]
        prompt: Option<String>,

        /// Raw invocation payload as a JSON object
        #[arg(long)]
        payload: Option<String>,
    },

    /// Look up the current time, as the gateway's time target does
    Time {
        /// Event JSON, e.g. '{"timezone": "UTC"}'
        #[arg(short, long, default_value = "{}")]
        event: String,
    },

    /// Print the time target's tool definition
    ToolSpec,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let config = config::load()?;
            let port = port.unwrap_or(config.port);
            let runtime = Arc::new(AgentRuntime::init(&config));

            ui::print_header(&config.model, std::env::var(config::GATEWAY_URL).ok().as_deref());
            ui::print_step(&format!("Serving /invocations and /ping on port {}", port));

            let channel = HttpChannel::new(runtime, port);
            channel.start().await?;
            ui::print_success("Stopped");
        }

        Commands::Invoke { prompt, payload } => {
            let config = config::load()?;
            let payload = parse_payload(prompt, payload)?;
            let runtime = Arc::new(AgentRuntime::init(&config));

            CliChannel::new(runtime, payload).start().await?;
        }

        Commands::Time { event } => {
            let event: serde_json::Value = serde_json::from_str(&event).context("event must be JSON")?;
            let response = time_lookup::lookup(&event);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::ToolSpec => {
            println!("{}", serde_json::to_string_pretty(&time_lookup::tool_spec())?);
        }
    }

    Ok(())
}

fn parse_payload(prompt: Option<String>, payload: Option<String>) -> Result<InvocationPayload> {
    match (prompt, payload) {
        (Some(prompt), _) => Ok(InvocationPayload::with_prompt(prompt)),
        (None, Some(raw)) => {
            let value: serde_json::Value = serde_json::from_str(&raw).context("payload must be JSON")?;
            if !value.is_object() {
                bail!("payload must be a JSON object");
            }
            Ok(serde_json::from_value(value)?)
        }
        (None, None) => Ok(InvocationPayload::default()),
    }
}
