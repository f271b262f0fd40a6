//! In-memory spreadsheet model used to rewrite `.xlsx` targets.
//!
//! Existing workbooks are read cell-by-cell with calamine, edited as a sparse
//! grid, and written back out with rust_xlsxwriter. Cell values of every sheet
//! survive the round trip, and date cells keep a date format; other
//! formatting and formulas do not.

use std::collections::BTreeMap;
use std::path::Path;

use calamine::{open_workbook, Data, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use serde_json::Value;

use crate::error::TabularError;

/// Largest row index (0-based) an `.xlsx` sheet can hold.
const MAX_ROW: u32 = 1_048_575;
/// Largest column index (0-based) an `.xlsx` sheet can hold.
const MAX_COL: u16 = 16_383;
const MAX_SHEET_NAME_CHARS: usize = 31;
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// A single stored cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    String(String),
    Number(f64),
    Bool(bool),
    /// Spreadsheet serial date (days since 1899-12-30, fraction is time of day).
    DateTime(f64),
}

impl CellValue {
    /// Convert a normalized query value; nulls map to an empty cell.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(flag) => Some(Self::Bool(*flag)),
            Value::Number(number) => number.as_f64().map(Self::Number),
            Value::String(text) => Some(Self::String(sanitize_text(text))),
            nested => Some(Self::String(sanitize_text(&nested.to_string()))),
        }
    }

    fn from_data(data: &Data) -> Option<Self> {
        match data {
            Data::Empty => None,
            Data::Int(value) => Some(Self::Number(*value as f64)),
            Data::Float(value) => Some(Self::Number(*value)),
            Data::Bool(value) => Some(Self::Bool(*value)),
            Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => {
                Some(Self::String(text.clone()))
            }
            Data::DateTime(value) => Some(Self::DateTime(value.as_f64())),
            Data::Error(error) => Some(Self::String(error.to_string())),
        }
    }
}

/// One worksheet as a sparse grid keyed by 0-based `(row, col)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    cells: BTreeMap<(u32, u16), CellValue>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn get(&self, row: u32, col: u16) -> Option<&CellValue> {
        self.cells.get(&(row, col))
    }

    pub fn set(&mut self, row: u32, col: u16, value: Option<CellValue>) {
        match value {
            Some(value) => {
                self.cells.insert((row, col), value);
            }
            None => {
                self.cells.remove(&(row, col));
            }
        }
    }

    pub fn has_data(&self) -> bool {
        !self.cells.is_empty()
    }

    /// 0-based index of the last row holding a value.
    pub fn last_used_row(&self) -> Option<u32> {
        self.cells.keys().map(|(row, _)| *row).max()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Empty every cell in the rectangle anchored at `(row, col)`.
    pub fn clear_rect(&mut self, row: u32, col: u16, rows: u32, cols: u16) {
        if rows == 0 || cols == 0 {
            return;
        }
        let last_row = row.saturating_add(rows - 1);
        let last_col = col.saturating_add(cols - 1);
        self.cells.retain(|(r, c), _| {
            !((row..=last_row).contains(r) && (col..=last_col).contains(c))
        });
    }

    /// Write a header row (optional) followed by data rows, anchored at `(row, col)`.
    ///
    /// Null values empty their target cell. Returns the number of sheet rows written.
    pub fn write_block(
        &mut self,
        row: u32,
        col: u16,
        columns: &[String],
        rows: &[Vec<Value>],
        include_header: bool,
    ) -> Result<u32, TabularError> {
        let total_rows = rows.len() + usize::from(include_header);
        let total_rows = u32::try_from(total_rows)
            .map_err(|_| TabularError::write("failed to write xlsx: too many rows"))?;
        check_extent(row, col, total_rows, columns.len())?;

        let mut current = row;
        if include_header {
            for (offset, name) in columns.iter().enumerate() {
                self.set(
                    current,
                    col + offset as u16,
                    Some(CellValue::String(sanitize_text(name))),
                );
            }
            current += 1;
        }
        for values in rows {
            for (offset, value) in values.iter().enumerate() {
                self.set(current, col + offset as u16, CellValue::from_json(value));
            }
            current += 1;
        }
        Ok(total_rows)
    }
}

/// A whole workbook: sheets in their original order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkbookModel {
    sheets: Vec<Sheet>,
}

impl WorkbookModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every sheet's cell values from an existing `.xlsx` file.
    pub fn read(path: &Path) -> Result<Self, calamine::XlsxError> {
        let mut workbook: Xlsx<_> = open_workbook(path)?;
        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook.worksheet_range(&name)?;
            let mut sheet = Sheet::new(name);
            if let Some((start_row, start_col)) = range.start() {
                for (row, col, data) in range.used_cells() {
                    let (Ok(row), Ok(col)) = (
                        u32::try_from(start_row as usize + row),
                        u16::try_from(start_col as usize + col),
                    ) else {
                        continue;
                    };
                    sheet.set(row, col, CellValue::from_data(data));
                }
            }
            sheets.push(sheet);
        }
        Ok(Self { sheets })
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|sheet| sheet.name.as_str()).collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets
            .iter()
            .find(|sheet| sheet.name.eq_ignore_ascii_case(name))
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets
            .iter_mut()
            .find(|sheet| sheet.name.eq_ignore_ascii_case(name))
    }

    /// Append a new empty sheet and return it.
    pub fn add_sheet(&mut self, name: &str) -> &mut Sheet {
        self.sheets.push(Sheet::new(name));
        let last = self.sheets.len() - 1;
        &mut self.sheets[last]
    }

    /// Add a sheet named `name`, taking over a lone empty sheet when there is one.
    pub fn add_or_adopt_sheet(&mut self, name: &str) -> &mut Sheet {
        if self.sheets.len() == 1 && !self.sheets[0].has_data() {
            self.sheets[0].name = name.to_string();
            return &mut self.sheets[0];
        }
        self.add_sheet(name)
    }

    /// Serialize the workbook to `.xlsx` bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, XlsxError> {
        let mut workbook = Workbook::new();
        for sheet in &self.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet.name)?;
            for (&(row, col), value) in &sheet.cells {
                write_cell(worksheet, row, col, value)?;
            }
        }
        if self.sheets.is_empty() {
            workbook.add_worksheet().set_name(DEFAULT_SHEET_NAME)?;
        }
        workbook.save_to_buffer()
    }
}

/// Write one stored value into a worksheet cell.
pub fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &CellValue,
) -> Result<(), XlsxError> {
    match value {
        CellValue::String(text) => worksheet.write_string(row, col, text)?,
        CellValue::Number(number) => worksheet.write_number(row, col, *number)?,
        CellValue::Bool(flag) => worksheet.write_boolean(row, col, *flag)?,
        CellValue::DateTime(serial) => {
            let pattern = if serial.fract() == 0.0 {
                "yyyy-mm-dd"
            } else {
                "yyyy-mm-dd hh:mm:ss"
            };
            worksheet.write_number_with_format(row, col, *serial, &Format::new().set_num_format(pattern))?
        }
    };
    Ok(())
}

/// Make a caller-supplied sheet name acceptable to spreadsheet applications.
pub fn sanitize_sheet_name(raw: Option<&str>) -> String {
    let raw = raw.map(str::trim).filter(|name| !name.is_empty()).unwrap_or(DEFAULT_SHEET_NAME);
    let sanitized: String = raw
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | '?' | '*' | '[' | ']' | ':' => '_',
            other => other,
        })
        .take(MAX_SHEET_NAME_CHARS)
        .collect();
    if sanitized.is_empty() {
        DEFAULT_SHEET_NAME.to_string()
    } else {
        sanitized
    }
}

/// Strip control characters that XML 1.0 cannot carry.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|ch| !matches!(ch, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}'))
        .collect()
}

/// Parse an `A1`-style reference (case-insensitive, `$` allowed) into 0-based `(row, col)`.
pub fn parse_cell_ref(raw: &str) -> Result<(u32, u16), TabularError> {
    let invalid = || TabularError::validation("invalid start_cell");
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|ch| *ch != '$')
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    let split = cleaned
        .find(|ch: char| ch.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (letters, digits) = cleaned.split_at(split);
    if letters.is_empty()
        || letters.len() > 3
        || !letters.chars().all(|ch| ch.is_ascii_uppercase())
        || !digits.chars().all(|ch| ch.is_ascii_digit())
    {
        return Err(invalid());
    }

    let col = letters
        .bytes()
        .fold(0_u32, |acc, byte| acc * 26 + u32::from(byte - b'A' + 1));
    let row: u32 = digits.parse().map_err(|_| invalid())?;
    if row == 0 || row - 1 > MAX_ROW || col == 0 || col - 1 > u32::from(MAX_COL) {
        return Err(invalid());
    }
    Ok((row - 1, (col - 1) as u16))
}

/// Column letters for a 0-based column index (`0` -> `A`, `27` -> `AB`).
pub fn column_letters(col: u16) -> String {
    let mut n = u32::from(col) + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push(char::from(b'A' + rem));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// `A1`-style address of a 0-based cell.
pub fn cell_ref(row: u32, col: u16) -> String {
    format!("{}{}", column_letters(col), row + 1)
}

/// Address of the written rectangle; a single cell collapses, nothing written is empty.
pub fn written_range(row: u32, col: u16, rows: u32, cols: usize) -> String {
    if rows == 0 || cols == 0 {
        return String::new();
    }
    let start = cell_ref(row, col);
    let end = cell_ref(row + rows - 1, col + (cols - 1) as u16);
    if start == end {
        start
    } else {
        format!("{start}:{end}")
    }
}

/// Fail when a block of `rows` x `cols` anchored at `(row, col)` leaves the sheet.
pub fn check_extent(row: u32, col: u16, rows: u32, cols: usize) -> Result<(), TabularError> {
    let too_large = || TabularError::write("failed to write xlsx: data exceeds sheet bounds");
    if rows > 0 && u64::from(row) + u64::from(rows) - 1 > u64::from(MAX_ROW) {
        return Err(too_large());
    }
    if cols > 0 && usize::from(col) + cols - 1 > usize::from(MAX_COL) {
        return Err(too_large());
    }
    Ok(())
}
