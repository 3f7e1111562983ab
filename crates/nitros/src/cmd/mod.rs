use std::time::Duration;

use clap::{Args, Subcommand};
use nitros_discovery::DiscoveryRegistry;
use tokio_util::sync::CancellationToken;

use crate::exit::{discovery_error, io_error, CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod echo;
pub mod hz;
pub mod info;
pub mod list;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Topic inspection tools.
    #[command(subcommand)]
    Topic(TopicCommand),
    /// Show version information.
    Version(VersionArgs),
}

#[derive(Subcommand, Debug)]
pub enum TopicCommand {
    /// List active topics on the network.
    List(ListArgs),
    /// Show details of one topic.
    Info(InfoArgs),
    /// Subscribe to a topic and print its messages.
    Echo(EchoArgs),
    /// Measure a topic's publish rate.
    Hz(HzArgs),
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub format: OutputFormat,
    /// Log per-message events from subscribers.
    pub events: bool,
}

pub fn run(command: Command, ctx: Context) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Topic(command) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| io_error("runtime setup failed", err))?;
            runtime.block_on(async move {
                match command {
                    TopicCommand::List(args) => list::run(args, ctx).await,
                    TopicCommand::Info(args) => info::run(args, ctx).await,
                    TopicCommand::Echo(args) => echo::run(args, ctx).await,
                    TopicCommand::Hz(args) => hz::run(args, ctx).await,
                }
            })
        }
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Scan duration (e.g. 2s, 500ms, 1.5).
    #[arg(short = 't', long, default_value = "2s", value_parser = parse_duration)]
    pub timeout: Duration,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Topic name.
    pub topic: String,
    /// Scan duration (e.g. 2s, 500ms, 1.5).
    #[arg(short = 't', long, default_value = "2s", value_parser = parse_duration)]
    pub timeout: Duration,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Topic name.
    pub topic: String,
    /// Exit after printing N messages.
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct HzArgs {
    /// Topic name.
    pub topic: String,
    /// Number of recent messages the rate is computed over.
    #[arg(short = 'w', long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(2..))]
    pub window: u32,
    /// Stop after this long instead of running until Ctrl+C.
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// The process-wide discovery registry. Must be called inside the runtime.
pub fn registry() -> CliResult<DiscoveryRegistry> {
    DiscoveryRegistry::shared().map_err(|err| discovery_error("discovery setup failed", err))
}

/// A token cancelled by Ctrl+C.
pub fn shutdown_token() -> CliResult<CancellationToken> {
    let token = CancellationToken::new();
    let handler = token.clone();
    ctrlc::set_handler(move || handler.cancel()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })?;
    Ok(token)
}

/// Parse `500ms`, `2s` or a bare number of seconds (`1.5`).
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err("duration must be greater than zero".to_string());
    }

    let secs = if millis { value / 1000.0 } else { value };
    Duration::try_from_secs_f64(secs).map_err(|err| format!("invalid duration {input}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1.5").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn parse_duration_millis() {
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_duration_invalid() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("-1").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }
}
