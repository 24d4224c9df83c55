// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod capture;
mod devices;
mod error;

use clap::{Parser, Subcommand};
use error::result_to_exit_code;
use std::process::ExitCode;

/// CamFlow CLI - Camera pipeline inspection and capture tool
#[derive(Parser)]
#[command(name = "camflow")]
#[command(version)]
#[command(about = "CamFlow CLI - Camera pipeline inspection and capture tool")]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Show debug-level log output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output results in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List media devices and their entity graphs
    Devices(devices::Args),

    /// Capture frames from a registered camera
    Capture(capture::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Devices(args) => devices::execute(args, cli.json),
        Commands::Capture(args) => capture::execute(args, cli.json),
    };

    result_to_exit_code(result)
}

/// Map the verbosity flags to a log filter. --quiet wins over --verbose.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = match (quiet, verbose) {
        (true, _) => "error",
        (false, true) => "debug",
        (false, false) => "info",
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .format_target(false)
        .init();
}
