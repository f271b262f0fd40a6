use tabula_warehouse::{QueryRequest, Tabular};

use crate::cli::QueryArgs;
use crate::error::CliError;

use super::CommandResult;

pub fn run(tabular: &Tabular, args: &QueryArgs) -> Result<CommandResult, CliError> {
    let response = tabular.query(&QueryRequest {
        source: args.source.to_request(),
        query: Some(args.sql.clone()),
        window_offset: args.window_offset,
        window_rows: args.window_rows,
    })?;

    let mut warnings = Vec::new();
    if response.has_more {
        warnings.push(format!(
            "result truncated to {} of {} rows; raise --window-offset to page",
            response.row_count, response.total_row_count
        ));
    }
    Ok(CommandResult::ok(serde_json::to_value(response)?).with_warnings(warnings))
}
