//! # Lease Keeper CLI
//!
//! Command-line interface for queues whose message leases are renewed
//! automatically.
//!
//! This module provides commands for:
//! - Sending messages, with large bodies offloaded to S3
//! - Consuming messages while their visibility is extended
//! - Inspecting queue attributes and the configured queues
//! - Validating and showing the resolved configuration
//! - Generating shell completions
//!
//! Command output goes to stdout; logs go to stderr.

use bytes::Bytes;
use clap::{CommandFactory, Parser, Subcommand};
use lease_keeper_core::{
    KeeperConfig, KeeperError, KeeperMessage, LeaseKeeper, QueueUrlBuilder, SendOptions,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log filter used when neither `--log-level` nor `RUST_LOG` is set
pub const DEFAULT_LOG_FILTER: &str = "lease_keeper_core=info,lease_keeper_runtime=info";

// ============================================================================
// CLI Structure
// ============================================================================

/// Lease Keeper CLI - SQS consumers with automatic visibility extension
#[derive(Parser, Debug)]
#[command(name = "lease-keeper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send and consume SQS messages with automatic lease renewal")]
#[command(
    long_about = "Lease Keeper extends the visibility of received messages while they are being worked on and moves oversized bodies to S3"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "LEASE_KEEPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level, or a full filter such as `lease_keeper_core=debug`
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message to a configured queue
    Send {
        /// Logical queue name
        queue: String,

        /// Message body; read from stdin when neither --body nor --file is given
        #[arg(short, long, conflicts_with = "file")]
        body: Option<String>,

        /// Read the message body from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Message group id for FIFO queues
        #[arg(long)]
        group_id: Option<String>,

        /// Deduplication id for FIFO queues
        #[arg(long)]
        dedup_id: Option<String>,

        /// Delivery delay in seconds
        #[arg(long)]
        delay: Option<u32>,

        /// Output format
        #[arg(short = 'o', long, default_value = "text")]
        format: OutputFormat,
    },

    /// Receive messages, keeping them invisible while held
    Consume {
        /// Logical queue name
        queue: String,

        /// Number of receive calls to make
        #[arg(short, long, default_value = "1")]
        max_batches: u32,

        /// Seconds to hold each batch before moving on
        #[arg(long, default_value = "0")]
        hold_seconds: u64,

        /// Delete each batch once it was held
        #[arg(short, long)]
        delete: bool,

        /// Output format
        #[arg(short = 'o', long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show attributes of a configured queue
    Attributes {
        /// Logical queue name
        queue: String,

        /// Attribute to read; all attributes when omitted
        #[arg(short, long = "name")]
        names: Vec<String>,

        /// Output format
        #[arg(short = 'o', long, default_value = "text")]
        format: OutputFormat,
    },

    /// List the ARN of every configured queue
    Lists {
        /// Output format
        #[arg(short = 'o', long, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Configuration(KeeperError),

    #[error("{0}")]
    Keeper(KeeperError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output formatting failed: {message}")]
    Output { message: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Keeper(_) => 2,
            Self::InvalidArgument { .. } => 3,
            Self::Io(_) => 4,
            Self::Output { .. } | Self::Logging { .. } => 5,
        }
    }
}

impl From<KeeperError> for CliError {
    fn from(error: KeeperError) -> Self {
        match error {
            KeeperError::ConfigurationMissing { .. } | KeeperError::InvalidConfiguration { .. } => {
                Self::Configuration(error)
            }
            other => Self::Keeper(other),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        Self::Output {
            message: error.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Output {
            message: error.to_string(),
        }
    }
}

// ============================================================================
// Output Views
// ============================================================================

/// Printable form of a sent message
#[derive(Debug, Clone, Serialize)]
pub struct SentView {
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_key: Option<String>,
}

/// Printable form of a received message
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub message_id: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_key: Option<String>,
    pub tracked: bool,
    pub attributes: BTreeMap<String, String>,
}

impl From<&KeeperMessage> for MessageView {
    fn from(message: &KeeperMessage) -> Self {
        Self {
            message_id: message.message_id.to_string(),
            body: message.body_text(),
            external_key: message.external_key.clone(),
            tracked: message.tracked,
            attributes: message
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Render `value` in the requested format, using `text` for plain output
pub fn render<T: Serialize>(
    value: &T,
    format: OutputFormat,
    text: impl FnOnce(&T) -> String,
) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Text => text(value),
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?.trim_end().to_string(),
    })
}

fn render_pairs(pairs: &BTreeMap<String, String>, separator: &str) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{}{}{}", key, separator, value))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let mut stdout = std::io::stdout();
    execute(cli, &mut stdout).await
}

/// Run a parsed command, writing its output to `out`
pub async fn execute(cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Send {
            queue,
            body,
            file,
            group_id,
            dedup_id,
            delay,
            format,
        } => {
            let keeper = connect(config_path)?;
            let body = read_body(body, file).await?;
            let options = SendOptions {
                message_group_id: group_id,
                deduplication_id: dedup_id,
                delay_seconds: delay,
            };
            execute_send_command(&keeper, &queue, body, options, format, out).await
        }
        Commands::Consume {
            queue,
            max_batches,
            hold_seconds,
            delete,
            format,
        } => {
            let keeper = connect(config_path)?;
            let options = ConsumeOptions {
                max_batches,
                hold: Duration::from_secs(hold_seconds),
                delete,
            };
            execute_consume_command(&keeper, &queue, &options, format, out).await
        }
        Commands::Attributes {
            queue,
            names,
            format,
        } => {
            let keeper = connect(config_path)?;
            execute_attributes_command(&keeper, &queue, &names, format, out).await
        }
        Commands::Lists { format } => {
            let keeper = connect(config_path)?;
            execute_lists_command(&keeper, format, out).await
        }
        Commands::Config { show, format } => {
            let config = KeeperConfig::load(config_path)?;
            execute_config_command(&config, show, format, out)
        }
        Commands::Completions { shell } => {
            execute_completions_command(shell, out);
            Ok(())
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging based on CLI arguments
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(expand_log_level(level)).map_err(|e| {
            CliError::InvalidArgument {
                arg: "--log-level".to_string(),
                message: e.to_string(),
            }
        })?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Turn a bare level into a filter for the lease keeper crates
pub fn expand_log_level(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!(
            "lease_keeper_core={0},lease_keeper_runtime={0},lease_keeper_cli={0}",
            level
        )
    }
}

/// Load configuration and build a client against AWS
fn connect(config_path: Option<&Path>) -> Result<LeaseKeeper, CliError> {
    let config = KeeperConfig::load(config_path)?;
    Ok(LeaseKeeper::from_config(config)?)
}

async fn read_body(body: Option<String>, file: Option<PathBuf>) -> Result<Bytes, CliError> {
    let body = match (body, file) {
        (Some(body), _) => Bytes::from(body),
        (None, Some(path)) => Bytes::from(tokio::fs::read(&path).await?),
        (None, None) => {
            let mut buffer = Vec::new();
            tokio::io::stdin().read_to_end(&mut buffer).await?;
            Bytes::from(buffer)
        }
    };

    if body.is_empty() {
        return Err(CliError::InvalidArgument {
            arg: "body".to_string(),
            message: "message body cannot be empty".to_string(),
        });
    }
    Ok(body)
}

/// Execute send command
pub async fn execute_send_command(
    keeper: &LeaseKeeper,
    queue: &str,
    body: Bytes,
    options: SendOptions,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let sent = keeper.send_message(queue, body, options).await?;
    let view = SentView {
        message_id: sent.message_id.to_string(),
        external_key: sent.external_key,
    };

    let rendered = render(&view, format, |view| match &view.external_key {
        Some(key) => format!("{} (body stored as {})", view.message_id, key),
        None => view.message_id.clone(),
    })?;
    writeln!(out, "{}", rendered)?;
    Ok(())
}

/// Options of the consume command
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub max_batches: u32,
    /// How long each batch is held before it is deleted or released
    pub hold: Duration,
    pub delete: bool,
}

/// Execute consume command
///
/// Renewal runs for the whole command; leases of held messages are extended
/// until they are deleted or the command ends.
pub async fn execute_consume_command(
    keeper: &LeaseKeeper,
    queue: &str,
    options: &ConsumeOptions,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    keeper.start();
    let result = consume_batches(keeper, queue, options, format, out).await;
    keeper.shutdown().await;

    let received = result?;
    info!(queue = %queue, received, "Consume finished");
    Ok(())
}

async fn consume_batches(
    keeper: &LeaseKeeper,
    queue: &str,
    options: &ConsumeOptions,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<usize, CliError> {
    let mut received = 0;

    for batch in 1..=options.max_batches {
        let messages = keeper.receive_messages(queue).await?;
        info!(queue = %queue, batch, count = messages.len(), "Received batch");
        if messages.is_empty() {
            continue;
        }
        received += messages.len();

        let views: Vec<MessageView> = messages.iter().map(MessageView::from).collect();
        let rendered = render(&views, format, |views| {
            views
                .iter()
                .map(|view| format!("{}\t{}", view.message_id, view.body))
                .collect::<Vec<_>>()
                .join("\n")
        })?;
        writeln!(out, "{}", rendered)?;

        let mut interrupted = false;
        if !options.hold.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(options.hold) => {}
                _ = tokio::signal::ctrl_c() => {
                    warn!(queue = %queue, "Interrupted while holding batch");
                    interrupted = true;
                }
            }
        }

        if options.delete {
            let items: Vec<_> = messages.iter().map(KeeperMessage::delete_item).collect();
            let report = keeper.delete_messages(queue, &items).await?;
            if !report.is_complete_success() {
                warn!(
                    queue = %queue,
                    deleted = report.deleted.len(),
                    failed = report.failed.len(),
                    "Some messages were not deleted"
                );
            }
        }

        if interrupted {
            break;
        }
    }

    Ok(received)
}

/// Execute attributes command
pub async fn execute_attributes_command(
    keeper: &LeaseKeeper,
    queue: &str,
    names: &[String],
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let attributes: BTreeMap<String, String> = keeper
        .queue_attributes(queue, names)
        .await?
        .into_iter()
        .collect();

    let rendered = render(&attributes, format, |pairs| render_pairs(pairs, ": "))?;
    writeln!(out, "{}", rendered)?;
    Ok(())
}

/// Execute lists command
pub async fn execute_lists_command(
    keeper: &LeaseKeeper,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let lists = keeper.all_lists().await?;

    let rendered = render(&lists, format, |pairs| render_pairs(pairs, "\t"))?;
    writeln!(out, "{}", rendered)?;
    Ok(())
}

/// Execute config command
pub fn execute_config_command(
    config: &KeeperConfig,
    show: bool,
    format: ConfigFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if show {
        let redacted = config.redacted();
        let rendered = match format {
            ConfigFormat::Yaml => serde_yaml::to_string(&redacted)?,
            ConfigFormat::Json => serde_json::to_string_pretty(&redacted)?,
        };
        writeln!(out, "{}", rendered.trim_end())?;
        return Ok(());
    }

    writeln!(
        out,
        "Configuration is valid: {} queue(s)",
        config.queues.len()
    )?;
    let urls = QueueUrlBuilder::new(config);
    for queue in &config.queues {
        let lease = if queue.tracks_leases() {
            format!(
                "lease {}s x{}",
                queue.visibility_timeout_seconds, queue.max_visibility_extensions
            )
        } else {
            "no lease tracking".to_string()
        };
        writeln!(out, "  {} -> {} ({})", queue.name, urls.build(queue)?, lease)?;
    }
    Ok(())
}

/// Execute completions command
pub fn execute_completions_command(shell: clap_complete::Shell, out: &mut dyn Write) {
    info!(shell = ?shell, "Generating shell completions");
    clap_complete::generate(shell, &mut Cli::command(), "lease-keeper", out);
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
