use clap::Parser;
use sortcopy::cli::{Cli, run_cli};
use sortcopy::logging::init_logging;
use sortcopy::output::OutputFormatter;
use sortcopy::run_state::CancelToken;
use std::process::ExitCode;
use tracing::{info, warn};

const EXIT_CANCELLED: u8 = 130;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, finishing in-flight copies...");
        handler_token.cancel();
    }) {
        warn!(error = %e, "could not install Ctrl+C handler");
    }

    match run_cli(&cli, &cancel) {
        Ok(result) if result.cancelled => ExitCode::from(EXIT_CANCELLED),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            OutputFormatter::error(&format!("Error: {}", e));
            ExitCode::FAILURE
        }
    }
}
