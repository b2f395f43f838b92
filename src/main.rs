//! Zentinel GraphQL server core binary.
//!
//! Run with:
//! - `zentinel-graphql-server check --schema schema.graphql --query query.graphql`
//! - `zentinel-graphql-server deliver --messages messages.json`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_graphql_server::transport::{
    ChannelConnection, Frame, JsonDocumentWriter, OperationMessage, Transport,
};
use zentinel_graphql_server::{GatewayConfig, GraphQLGateway, Identity};

/// GraphQL authorization and ordered subscription delivery.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a query against the schema's authorization policies
    Check {
        /// Schema SDL file
        #[arg(long)]
        schema: PathBuf,

        /// GraphQL query document
        #[arg(long)]
        query: PathBuf,

        /// Operation to run when the document holds several
        #[arg(long)]
        operation_name: Option<String>,

        /// Caller identity (YAML); anonymous when absent
        #[arg(long)]
        identity: Option<PathBuf>,
    },

    /// Write a JSON array of protocol messages through a transport and print
    /// the resulting frames
    Deliver {
        /// JSON file holding an array of messages
        #[arg(long)]
        messages: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr, results to stdout
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!(
        "Starting Zentinel GraphQL server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = load_config(&args.config).await?;

    match args.command {
        Command::Check {
            schema,
            query,
            operation_name,
            identity,
        } => check(config, &schema, &query, operation_name, identity.as_deref()).await,
        Command::Deliver { messages } => deliver(config, &messages).await,
    }
}

async fn load_config(path: &Path) -> Result<GatewayConfig> {
    if path.exists() {
        info!("Config file: {}", path.display());
        GatewayConfig::load(path)
            .await
            .context("Failed to load config file")
    } else {
        info!("Config file not found, using defaults");
        Ok(GatewayConfig::default())
    }
}

async fn check(
    config: GatewayConfig,
    schema: &Path,
    query: &Path,
    operation_name: Option<String>,
    identity: Option<&Path>,
) -> Result<ExitCode> {
    let sdl = tokio::fs::read_to_string(schema)
        .await
        .context("Failed to read schema file")?;
    let query = tokio::fs::read_to_string(query)
        .await
        .context("Failed to read query file")?;
    let identity = match identity {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .context("Failed to read identity file")?;
            serde_yaml::from_str(&content).context("Failed to parse identity file")?
        }
        None => Identity::anonymous(),
    };

    let gateway = GraphQLGateway::new(sdl, config).context("Failed to create gateway")?;
    let body = serde_json::to_vec(&serde_json::json!({
        "query": query,
        "operationName": operation_name,
    }))?;

    let decision = gateway
        .check_request(&body, &identity)
        .await
        .context("Authorization failed")?;

    match decision.response_body() {
        Some(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::FAILURE)
        }
        None => {
            println!("{}", serde_json::json!({ "allowed": true }));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn deliver(config: GatewayConfig, path: &Path) -> Result<ExitCode> {
    let content = tokio::fs::read_to_string(path)
        .await
        .context("Failed to read messages file")?;
    let messages: Vec<OperationMessage> =
        serde_json::from_str(&content).context("Failed to parse messages file")?;

    let (connection, frames) = ChannelConnection::new();
    let printer = tokio::spawn(print_frames(frames));

    let transport = Transport::new(
        Arc::new(connection),
        Arc::new(JsonDocumentWriter),
        &config.pipeline,
    );

    let submit = async {
        for message in messages {
            transport.writer().send(message).await?;
        }
        anyhow::Ok(())
    };

    tokio::select! {
        result = submit => result.context("Failed to submit messages")?,
        _ = tokio::signal::ctrl_c() => warn!("Received shutdown signal"),
    }

    transport.shutdown().await.context("Failed to close connection")?;
    let stats = transport.writer().stats();
    info!(
        written = stats.written(),
        dropped = stats.dropped(),
        failed = stats.failed(),
        "Delivery finished"
    );

    drop(transport);
    printer.await.context("Frame printer panicked")?;
    Ok(ExitCode::SUCCESS)
}

async fn print_frames(mut frames: UnboundedReceiver<Frame>) {
    while let Some(frame) = frames.recv().await {
        match frame {
            Frame::Text(text) => println!("{}", text),
            Frame::Close { code, reason } => {
                println!("close {} {}", code, reason);
                break;
            }
        }
    }
}
