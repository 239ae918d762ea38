//! MOO conformance harness CLI
//!
//! Drives a MOO server over its network protocol and checks observable
//! behavior against declarative YAML test suites.

use std::process::ExitCode;

use clap::Parser;
use moo_conformance::cli::{self, Commands};
use moo_conformance::common::logging;

#[derive(Parser)]
#[command(name = "mooconf", about = "MOO server conformance test harness")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_cli();

    let cli = Cli::parse();

    match cli::dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
