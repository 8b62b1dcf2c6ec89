//! The main entrypoint for the fuzzer-imagectl CLI

use anyhow::Result;
use clap::{CommandFactory, Parser};

use imagectl_lib::CliOpts;

fn run() -> Result<()> {
    imagectl_utils::initialize_tracing();
    tracing::trace!("starting {}", env!("CARGO_PKG_NAME"));

    let opts = CliOpts::parse();
    if !opts.requests_action() {
        CliOpts::command().print_help()?;
        std::process::exit(1);
    }

    let config = opts.validate()?;
    imagectl_lib::run(config)
}

fn main() {
    imagectl_utils::run_main(run)
}
