//! CLI argument definitions for `para-serve`.

use clap::{Parser, Subcommand};
use para_serve_config::TunnelMode;

use crate::output::OutputFormat;

/// Local supervisor for the Para MCP server.
#[derive(Parser, Debug)]
#[command(name = "para-serve", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Lifecycle commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum CliCommand {
    /// Creates the virtual environment and installs dependencies.
    Setup,
    /// Starts the server, optionally behind a tunnel.
    Start {
        /// Port to listen on; defaults to the configured port.
        #[arg(long)]
        port: Option<u16>,
        /// Tunnel to start: none, ephemeral, or persistent.
        #[arg(long, value_name = "MODE")]
        tunnel: Option<TunnelMode>,
        /// Keep the server attached to this terminal until interrupted.
        #[arg(long)]
        foreground: bool,
    },
    /// Stops the tunnel and the server.
    Stop,
    /// Reports whether the server and tunnel are running.
    Status {
        /// Controls how the report is rendered.
        #[arg(long, value_enum, default_value_t = OutputFormat::Auto)]
        output: OutputFormat,
    },
    /// Prints recent log lines.
    Logs {
        /// Reads the tunnel log instead of the server log.
        #[arg(long)]
        tunnel: bool,
        /// Keeps printing new output until interrupted.
        #[arg(long, short = 'f')]
        follow: bool,
        /// Number of trailing lines to print.
        #[arg(long, short = 'n', default_value_t = 50)]
        lines: usize,
    },
    /// Shows how the working directory was resolved and which tools were found.
    Env {
        /// Controls how the report is rendered.
        #[arg(long, value_enum, default_value_t = OutputFormat::Auto)]
        output: OutputFormat,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> CliCommand {
        Cli::try_parse_from(std::iter::once("para-serve").chain(args.iter().copied()))
            .expect("arguments parse")
            .command
    }

    #[test]
    fn start_accepts_port_tunnel_and_foreground() {
        assert_eq!(
            parse(&["start", "--port", "9000", "--tunnel", "ephemeral", "--foreground"]),
            CliCommand::Start {
                port: Some(9000),
                tunnel: Some(TunnelMode::Ephemeral),
                foreground: true,
            }
        );
    }

    #[test]
    fn logs_default_to_fifty_server_lines() {
        assert_eq!(
            parse(&["logs"]),
            CliCommand::Logs {
                tunnel: false,
                follow: false,
                lines: 50,
            }
        );
    }

    #[rstest]
    #[case(&["status"], OutputFormat::Auto)]
    #[case(&["status", "--output", "json"], OutputFormat::Json)]
    #[case(&["status", "--output", "human"], OutputFormat::Human)]
    fn status_output_format(#[case] args: &[&str], #[case] expected: OutputFormat) {
        assert_eq!(parse(args), CliCommand::Status { output: expected });
    }

    #[test]
    fn unknown_tunnel_mode_is_rejected() {
        let result = Cli::try_parse_from(["para-serve", "start", "--tunnel", "sideways"]);
        assert!(result.is_err());
    }
}
