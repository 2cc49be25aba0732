//! Command-line interface

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// mtls-gate - client certificate validation against a CA bundle and policy
#[derive(Parser, Debug)]
#[command(name = "mtls-gate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MTLS_GATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "MTLS_GATE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MTLS_GATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate a client certificate against the configured policy
    ///
    /// Prints the verdict as JSON.  Exit code 0 when accepted, 2 when
    /// rejected, 1 when the configuration or trust bundle cannot be loaded.
    Check {
        /// Client certificate (PEM or DER)
        #[arg(required = true)]
        cert: PathBuf,

        /// Evaluate at this instant instead of now (RFC 3339)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// List the certificates of a CA bundle
    Bundle {
        /// Bundle path (defaults to `mtls.ca_bundle_path`)
        path: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_check_with_instant() {
        let cli = Cli::try_parse_from([
            "mtls-gate",
            "--config",
            "gate.yaml",
            "check",
            "client.pem",
            "--at",
            "2026-06-01T12:00:00Z",
        ])
        .unwrap();
        match cli.command {
            Command::Check { cert, at } => {
                assert_eq!(cert, PathBuf::from("client.pem"));
                assert_eq!(at.unwrap().to_rfc3339(), "2026-06-01T12:00:00+00:00");
            }
            Command::Bundle { .. } => panic!("expected check"),
        }
        assert_eq!(cli.config, Some(PathBuf::from("gate.yaml")));
    }

    #[test]
    fn bundle_path_is_optional() {
        let cli = Cli::try_parse_from(["mtls-gate", "bundle"]).unwrap();
        assert!(matches!(cli.command, Command::Bundle { path: None }));
    }

    #[test]
    fn check_requires_certificate() {
        assert!(Cli::try_parse_from(["mtls-gate", "check"]).is_err());
    }
}
