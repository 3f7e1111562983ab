mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, Context};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "nitros", version, about = "Inspect nitros topics on the local network")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Log every message sent, received or dropped.
    #[arg(long, global = true)]
    log_events: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level, cli.log_events);

    let ctx = Context {
        format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
        events: cli.log_events,
    };
    let result = cmd::run(cli.command, ctx);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::TopicCommand;

    #[test]
    fn parses_topic_list() {
        let cli = Cli::try_parse_from(["nitros", "topic", "list", "-t", "500ms"])
            .expect("list args should parse");
        let Command::Topic(TopicCommand::List(args)) = cli.command else {
            panic!("expected topic list");
        };
        assert_eq!(args.timeout, std::time::Duration::from_millis(500));
    }

    #[test]
    fn parses_topic_echo_with_count() {
        let cli = Cli::try_parse_from(["nitros", "--format", "json", "topic", "echo", "sensors", "-n", "3"])
            .expect("echo args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        let Command::Topic(TopicCommand::Echo(args)) = cli.command else {
            panic!("expected topic echo");
        };
        assert_eq!(args.topic, "sensors");
        assert_eq!(args.count, Some(3));
    }

    #[test]
    fn rejects_single_message_rate_window() {
        let err = Cli::try_parse_from(["nitros", "topic", "hz", "sensors", "-w", "1"])
            .expect_err("window below 2 should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["nitros", "version", "--extended", "--log-events"])
            .expect("version args should parse");
        assert!(cli.log_events);
        assert!(matches!(cli.command, Command::Version(ref args) if args.extended));
    }

    #[test]
    fn requires_topic_subcommand() {
        assert!(Cli::try_parse_from(["nitros", "topic"]).is_err());
    }
}
