use anyhow::Result;
use clap::ArgMatches;
use std::sync::Arc;

use crate::core::context::Context;

pub fn handle_config(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => {
            println!("{}", serde_json::to_string_pretty(&ctx.config)?);
            Ok(())
        }
        Some(("path", _)) => {
            println!("{}", ctx.config_store().path().display());
            Ok(())
        }
        _ => {
            println!("Use 'valmon config --help' for more information.");
            Ok(())
        }
    }
}
