//! Subcommand dispatch.

mod send;

use crate::cli::{Cli, Command};
use crate::config::Config;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    match cli.command {
        Command::Send(args) => send::run(args, &config).await,
    }
}
