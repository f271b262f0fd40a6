mod export;
mod inspect;
mod query;

use std::time::Instant;

use serde_json::Value;
use tabula_warehouse::Tabular;

use crate::cli::{Cli, Command};
use crate::envelope::Envelope;
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

pub fn run(cli: &Cli) -> Result<Envelope, CliError> {
    let tabular = Tabular::new(cli.config());
    let started = Instant::now();

    let result = match &cli.command {
        Command::Map(args) => inspect::map(&tabular, args)?,
        Command::Describe(args) => inspect::describe(&tabular, args)?,
        Command::Stats(args) => inspect::stats(&tabular, args)?,
        Command::Rows(args) => inspect::rows(&tabular, args)?,
        Command::Query(args) => query::run(&tabular, args)?,
        Command::Export(args) => export::export(&tabular, args)?,
        Command::Update(args) => export::update(&tabular, args)?,
        Command::Invalidate(args) => {
            tabular.invalidate(&args.workspace, &args.path);
            CommandResult::ok(serde_json::json!({ "invalidated": args.path.trim() }))
        }
    };

    let latency_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(latency_ms, warnings = result.warnings.len(), "tabula.command_completed");
    Ok(Envelope::success(result.data, latency_ms, result.warnings))
}
