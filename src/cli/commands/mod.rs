//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod config;
pub mod run;
pub mod version;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands, ConfigSubcommand};
use crate::error::ScareBoxError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// `shutdown` fires on the first termination signal.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, shutdown: CancellationToken) -> Result<(), ScareBoxError> {
    match cli.command {
        Commands::Run(args) => run::run(&args, shutdown).await,
        Commands::Config(cmd) => match cmd.subcommand {
            ConfigSubcommand::Show(args) => config::show(&args),
            ConfigSubcommand::Validate(args) => config::validate(&args),
        },
        Commands::Version => {
            version::run();
            Ok(())
        }
    }
}
