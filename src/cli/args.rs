//! CLI argument definitions
//!
//! All Clap derive structs for `scarebox` command-line parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::config::{CONFIG_ENV, DEFAULT_CONFIG_PATH};

// ============================================================================
// Root CLI
// ============================================================================

/// Jump-scare installation controller.
#[derive(Parser, Debug)]
#[command(name = "scarebox", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "SCAREBOX_COLOR")]
    pub color: ColorChoice,

    /// Log line format.
    #[arg(long, default_value = "human", global = true, env = "SCAREBOX_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the installation and its HTTP API.
    Run(RunArgs),

    /// Inspect or validate the configuration file.
    Config(ConfigCommand),

    /// Display version information.
    Version,
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Bind the HTTP server on `[host:]port` instead of the configured address.
    #[arg(long, env = "SCAREBOX_BIND")]
    pub bind: Option<String>,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "SCAREBOX_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Initialize devices but wait for `POST /api/start`.
    #[arg(long)]
    pub no_autostart: bool,

    /// How long to wait for a graceful stop after a shutdown signal.
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    pub shutdown_timeout: Duration,
}

// ============================================================================
// Config Command
// ============================================================================

/// Configuration commands.
#[derive(Args, Debug)]
pub struct ConfigCommand {
    /// Config subcommand.
    #[command(subcommand)]
    pub subcommand: ConfigSubcommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Print the effective configuration as YAML.
    Show(ConfigShowArgs),

    /// Check the configuration file for problems.
    Validate(ConfigValidateArgs),
}

/// Arguments for `config show`.
#[derive(Args, Debug)]
pub struct ConfigShowArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

/// Arguments for `config validate`.
#[derive(Args, Debug)]
pub struct ConfigValidateArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Treat warnings and unknown keys as errors.
    #[arg(long)]
    pub strict: bool,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Human,
    /// Newline-delimited JSON.
    Json,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["scarebox", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("Expected RunArgs");
        };
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.shutdown_timeout, Duration::from_secs(5));
        assert!(!args.no_autostart);
        assert!(args.bind.is_none());
    }

    #[test]
    fn test_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "scarebox",
            "run",
            "--config",
            "box.yaml",
            "--bind",
            ":9000",
            "--no-autostart",
            "--shutdown-timeout",
            "1500ms",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("Expected RunArgs");
        };
        assert_eq!(args.config, PathBuf::from("box.yaml"));
        assert_eq!(args.bind.as_deref(), Some(":9000"));
        assert!(args.no_autostart);
        assert_eq!(args.shutdown_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_bad_shutdown_timeout() {
        let cli = Cli::try_parse_from(["scarebox", "run", "--shutdown-timeout", "soon"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["scarebox", "-vv", "--log-format", "json", "version"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.color, ColorChoice::Auto);
    }

    #[test]
    fn test_config_validate_strict() {
        let cli = Cli::try_parse_from(["scarebox", "config", "validate", "--strict"]).unwrap();
        let Commands::Config(cmd) = cli.command else {
            panic!("Expected ConfigCommand");
        };
        assert!(matches!(
            cmd.subcommand,
            ConfigSubcommand::Validate(ConfigValidateArgs { strict: true, .. })
        ));
    }

    #[test]
    fn test_help_output() {
        let err = Cli::try_parse_from(["scarebox", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
