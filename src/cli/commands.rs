use clap::Subcommand;

use super::config::ConfigArgs;
use super::run::RunArgs;
use super::serve::ServeArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Serve the install wizard over HTTP
    Serve(ServeArgs),

    /// Drive the wizard headless from an event script
    Run(RunArgs),

    /// Inspect the onboard configuration
    Config(ConfigArgs),

    /// Show version and build information
    Info,
}
