//! Write commands: export and update.

use tabula_warehouse::{ExportRequest, Tabular, UpdateFromExportRequest};

use crate::cli::{ExportArgs, UpdateArgs};
use crate::error::CliError;

use super::CommandResult;

pub fn export(tabular: &Tabular, args: &ExportArgs) -> Result<CommandResult, CliError> {
    let response = tabular.export(&ExportRequest {
        source: args.source.to_request(),
        query: args.query.clone(),
        target_path: args.target.clone(),
        target_root: args.target_root.clone(),
        format: args.format.clone(),
        sheet: args.sheet.clone(),
    })?;
    let warnings = response.warnings.clone();
    Ok(CommandResult::ok(serde_json::to_value(response)?).with_warnings(warnings))
}

pub fn update(tabular: &Tabular, args: &UpdateArgs) -> Result<CommandResult, CliError> {
    let response = tabular.update_from_export(&UpdateFromExportRequest {
        source: args.source.to_request(),
        query: args.query.clone(),
        target_path: args.target.clone(),
        target_root: args.target_root.clone(),
        sheet: Some(args.sheet.clone()),
        mode: Some(args.mode.clone()),
        start_cell: args.start_cell.clone(),
        include_header: args.include_header,
        create_workbook_if_missing: args.create_workbook_if_missing,
        create_sheet_if_missing: args.create_sheet_if_missing,
        clear_target_range: args.clear_target_range,
    })?;
    let warnings = response.warnings.clone();
    Ok(CommandResult::ok(serde_json::to_value(response)?).with_warnings(warnings))
}
