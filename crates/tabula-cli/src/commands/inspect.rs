//! Read-only inspection commands: map, describe, stats, rows.

use tabula_warehouse::{ReadRowsRequest, StatsRequest, Tabular};

use crate::cli::{RowsArgs, SourceArgs, StatsArgs};
use crate::error::CliError;

use super::CommandResult;

pub fn map(tabular: &Tabular, args: &SourceArgs) -> Result<CommandResult, CliError> {
    let response = tabular.get_map(&args.to_request())?;
    Ok(CommandResult::ok(serde_json::to_value(response)?))
}

pub fn describe(tabular: &Tabular, args: &SourceArgs) -> Result<CommandResult, CliError> {
    let response = tabular.describe(&args.to_request())?;
    Ok(CommandResult::ok(serde_json::to_value(response)?))
}

pub fn stats(tabular: &Tabular, args: &StatsArgs) -> Result<CommandResult, CliError> {
    let response = tabular.get_stats(&StatsRequest {
        source: args.source.to_request(),
        columns: args.columns.clone(),
    })?;
    Ok(CommandResult::ok(serde_json::to_value(response)?))
}

pub fn rows(tabular: &Tabular, args: &RowsArgs) -> Result<CommandResult, CliError> {
    let response = tabular.read_rows(&ReadRowsRequest {
        source: args.source.to_request(),
        row_start: args.row_start,
        row_count: args.row_count,
        columns: args.columns.clone(),
    })?;
    Ok(CommandResult::ok(serde_json::to_value(response)?))
}
