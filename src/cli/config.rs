//! Settings commands.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Settings;

/// Settings operations.
#[derive(Parser)]
pub struct ConfigCommand {
    /// Config subcommand to execute.
    #[command(subcommand)]
    pub command: ConfigSubcommands,
}

/// Config subcommands.
#[derive(Subcommand)]
pub enum ConfigSubcommands {
    /// Prints the effective settings and the file locations they resolve to.
    Show,
    /// Prints the default settings file location.
    Path,
}

impl ConfigCommand {
    /// Executes the config command.
    pub fn execute(self, settings: &Settings) -> Result<()> {
        match self.command {
            ConfigSubcommands::Show => {
                print!("{}", settings.to_yaml()?);
                println!("# data directory: {}", settings.data_dir()?.display());
                println!("# policy directory: {}", settings.policy_dir()?.display());
                Ok(())
            }
            ConfigSubcommands::Path => {
                println!("{}", Settings::default_path()?.display());
                Ok(())
            }
        }
    }
}
