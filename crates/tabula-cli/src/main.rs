mod cli;
mod commands;
mod envelope;
mod error;

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::envelope::Envelope;
use crate::error::CliError;

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let (envelope, exit_code) = match commands::run(cli) {
        Ok(envelope) => (envelope, ExitCode::SUCCESS),
        Err(CliError::Tabular(error)) => {
            let code = CliError::tabular_exit_code(&error);
            (Envelope::failure(&error), ExitCode::from(code))
        }
        Err(other) => return Err(other),
    };

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&envelope)?
    } else {
        serde_json::to_string(&envelope)?
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{rendered}")?;
    Ok(exit_code)
}

/// Diagnostics go to stderr so stdout carries only the envelope.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
