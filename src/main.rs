use clap::Parser;
use scansort::cli::{Cli, run_cli};
use scansort::coordinator::EXIT_CONFIG;
use scansort::logging;
use scansort::output::OutputFormatter;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, cli.quiet, cli.logfile.as_deref()) {
        OutputFormatter::error(&format!("{:#}", e));
        return ExitCode::from(EXIT_CONFIG);
    }

    ExitCode::from(run_cli(cli))
}
