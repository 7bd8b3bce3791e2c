mod args;
mod commands;
mod terminal;

use anyhow::Result;
use args::CliArgs;
use clap::Parser;
use log::error;
use std::process;

fn run_app() -> Result<()> {
    let args = CliArgs::parse();
    terminal::init_logging(args.verbose);
    commands::execute(args.command)
}

fn main() {
    process::exit(match run_app() {
        Ok(()) => 0,
        Err(err) => {
            error!("Fatal: {:#}", err);
            1
        }
    });
}
