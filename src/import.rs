use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::{from_excel_serial, parse_amount, parse_date};
use crate::record::RowRecord;
use crate::schema::{FieldKind, RowVariant, is_sequence_field};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read import file: {0}")]
    Io(#[from] std::io::Error),
    #[error("import file is empty")]
    Empty,
    #[error("no column in the header matches a {0} field")]
    NoRecognizedColumns(RowVariant),
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[cfg(feature = "web")]
    #[error("failed to read workbook: {0}")]
    Excel(#[from] calamine::XlsxError),
}

/// Rows parsed from an import file.
#[derive(Debug, Default, PartialEq)]
pub struct ImportReport {
    pub rows: Vec<RowRecord>,
    /// Data rows dropped because a date or amount cell could not be parsed.
    pub skipped: usize,
    /// Header cells that matched no field.
    pub unmapped_columns: Vec<String>,
}

enum Column {
    Sequence,
    Field(&'static str, FieldKind),
    Ignored,
}

/// Import a table from CSV text
///
/// The header row is matched against the variant's field names, labels and
/// aliases, so both exported files and database dumps load. Dates are
/// normalized to `YYYY-MM-DD`. Quoted values may contain line breaks. Blank
/// records are ignored; rows with an
/// unparseable date or amount are skipped and counted.
///
/// # Arguments
/// * `variant` - Which table the file holds
/// * `text` - The CSV content
///
/// # Returns
/// * `Result<ImportReport, ImportError>` - The parsed rows or an error
///
/// # Examples
/// ```
/// use tracker::import::from_csv_str;
/// use tracker::schema::RowVariant;
///
/// let report = from_csv_str(
///     RowVariant::ContractorList,
///     "S.No,Contractor,End Date\n1,Acme,31/12/2025\n2,Beta,someday\n",
/// )
/// .unwrap();
/// assert_eq!(report.rows.len(), 1);
/// assert_eq!(report.rows[0].get("endDate"), "2025-12-31");
/// assert_eq!(report.skipped, 1);
/// ```
pub fn from_csv_str(variant: RowVariant, text: &str) -> Result<ImportReport, ImportError> {
    let mut records = parse_csv_records(text.trim_start_matches('\u{feff}'))
        .into_iter()
        .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()));
    let header = records.next().ok_or(ImportError::Empty)?;
    from_cells(variant, header, records)
}

pub fn from_csv(variant: RowVariant, filepath: impl AsRef<Path>) -> Result<ImportReport, ImportError> {
    let text = fs::read_to_string(filepath)?;
    from_csv_str(variant, &text)
}

/// Import a table from the first worksheet of an XLSX workbook held in memory
///
/// Date columns accept real Excel dates, serial numbers and text dates.
#[cfg(feature = "web")]
pub fn from_excel_bytes(variant: RowVariant, bytes: &[u8]) -> Result<ImportReport, ImportError> {
    use calamine::{Reader, Xlsx, open_workbook_from_rs};
    use std::io::Cursor;

    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes.to_vec()))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ImportError::Empty)?;
    let range = workbook.worksheet_range(&sheet_name)?;

    let mut rows = range.rows().map(|row| row.iter().map(excel_cell_text).collect::<Vec<_>>());
    let header = rows.next().ok_or(ImportError::Empty)?;
    let body = rows.filter(|cells| cells.iter().any(|c| !c.trim().is_empty()));
    from_cells(variant, header, body)
}

#[cfg(feature = "web")]
pub fn from_excel(variant: RowVariant, filepath: impl AsRef<Path>) -> Result<ImportReport, ImportError> {
    let bytes = fs::read(filepath)?;
    from_excel_bytes(variant, &bytes)
}

/// Pick the importer by file extension.
pub fn load_table(variant: RowVariant, filepath: impl AsRef<Path>) -> Result<ImportReport, ImportError> {
    let path = filepath.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => from_csv(variant, path),
        #[cfg(feature = "web")]
        Some("xlsx") | Some("xls") => from_excel(variant, path),
        #[cfg(not(feature = "web"))]
        Some("xlsx") | Some("xls") => Err(ImportError::Unsupported(
            "Excel support requires the 'web' feature".to_string(),
        )),
        Some(ext) => Err(ImportError::Unsupported(ext.to_string())),
        None => Err(ImportError::Unsupported("file has no extension".to_string())),
    }
}

#[cfg(feature = "web")]
fn excel_cell_text(cell: &calamine::Data) -> String {
    use calamine::Data;

    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => from_excel_serial(dt.as_f64())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) => s.clone(),
        other => other.to_string(),
    }
}

fn from_cells<I>(variant: RowVariant, header: Vec<String>, rows: I) -> Result<ImportReport, ImportError>
where
    I: Iterator<Item = Vec<String>>,
{
    let schema = variant.schema();
    let mut report = ImportReport::default();

    let columns: Vec<Column> = header
        .iter()
        .map(|cell| {
            if is_sequence_field(cell) {
                Column::Sequence
            } else if let Some(name) = schema.resolve(cell) {
                let kind = schema.field(name).map(|f| f.kind).unwrap_or(FieldKind::Text);
                Column::Field(name, kind)
            } else {
                if !cell.trim().is_empty() {
                    report.unmapped_columns.push(cell.trim().to_string());
                }
                Column::Ignored
            }
        })
        .collect();

    if !columns.iter().any(|c| matches!(c, Column::Field(..))) {
        return Err(ImportError::NoRecognizedColumns(variant));
    }

    for (line, cells) in rows.enumerate() {
        match build_row(variant, &columns, &cells) {
            Some(row) if !row.is_empty() => report.rows.push(row),
            Some(_) => {}
            None => {
                debug!(variant = %variant, line = line + 2, "skipping malformed import row");
                report.skipped += 1;
            }
        }
    }

    if report.skipped > 0 {
        warn!(variant = %variant, skipped = report.skipped, "import skipped malformed rows");
    }
    Ok(report)
}

fn build_row(variant: RowVariant, columns: &[Column], cells: &[String]) -> Option<RowRecord> {
    let mut row = RowRecord::blank(variant);
    for (column, raw) in columns.iter().zip(cells) {
        let value = raw.trim();
        match column {
            Column::Sequence => row.sno = value.parse().unwrap_or(0),
            Column::Ignored => {}
            Column::Field(_, _) if value.is_empty() => {}
            Column::Field(name, FieldKind::Date) => {
                let date = parse_date(value).or_else(|| value.parse::<f64>().ok().and_then(from_excel_serial))?;
                row.set(name, date.format("%Y-%m-%d").to_string());
            }
            Column::Field(name, FieldKind::Amount) => {
                parse_amount(value)?;
                row.set(name, value);
            }
            Column::Field(name, _) => row.set(name, value),
        }
    }
    Some(row)
}

// Split CSV text into records. Quoted fields may span line breaks.
fn parse_csv_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                record.push(std::mem::take(&mut current_field));
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut current_field));
                records.push(std::mem::take(&mut record));
            }
            _ => current_field.push(c),
        }
    }

    if !current_field.is_empty() || !record.is_empty() {
        record.push(current_field);
        records.push(record);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_fields() {
        assert_eq!(
            parse_csv_records("1,\"Acme, Ltd\",\"say \"\"hi\"\"\",x\r\n2,\"two\nlines\",,"),
            vec![
                vec!["1", "Acme, Ltd", "say \"hi\"", "x"],
                vec!["2", "two\nlines", "", ""],
            ]
        );
    }

    #[test]
    fn database_headers_and_serial_dates() {
        let report = from_csv_str(
            RowVariant::Epbg,
            "contractor,bg_amount,bg_validity,created_at\nAcme,\"1,00,000\",45658,2024-01-01\n,,,\n",
        )
        .unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].get("bgAmount"), "1,00,000");
        assert_eq!(report.rows[0].get("bgValidity"), "2025-01-01");
        assert_eq!(report.unmapped_columns, vec!["created_at"]);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn unknown_header_is_an_error() {
        assert!(matches!(
            from_csv_str(RowVariant::BillTracker, "foo,bar\n1,2\n"),
            Err(ImportError::NoRecognizedColumns(RowVariant::BillTracker))
        ));
        assert!(matches!(from_csv_str(RowVariant::BillTracker, ""), Err(ImportError::Empty)));
    }

    #[test]
    fn unsupported_extension() {
        assert!(matches!(
            load_table(RowVariant::Epbg, "guarantees.pdf"),
            Err(ImportError::Unsupported(_))
        ));
    }
}
