use thiserror::Error;

use crate::record::RowRecord;
#[cfg(feature = "web")]
use crate::schema::FieldKind;
use crate::schema::{FieldSpec, RowVariant};

#[derive(Debug, Error)]
pub enum ExportError {
    #[cfg(feature = "web")]
    #[error("failed to build workbook: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("XLSX export requires the 'web' feature")]
    Unsupported,
}

/// Convert one table to CSV
///
/// The first line holds the column labels (`S.No`, then every visible field of
/// the variant). Attachment payloads are left out; only the file name is kept.
/// Values containing commas, quotes or newlines are quoted.
///
/// # Arguments
/// * `variant` - Which table the rows belong to
/// * `rows` - The rows to export, in display order
///
/// # Returns
/// * `String` - CSV content
///
/// # Examples
/// ```
/// use tracker::export::to_csv;
/// use tracker::record::RowRecord;
/// use tracker::schema::RowVariant;
///
/// let row = RowRecord::from_pairs(RowVariant::Epbg, [("sno", "1"), ("contractor", "Acme, Ltd")]);
/// let csv = to_csv(RowVariant::Epbg, &[row]);
/// assert!(csv.starts_with("S.No,Contractor,PO No"));
/// assert!(csv.contains("1,\"Acme, Ltd\""));
/// ```
pub fn to_csv(variant: RowVariant, rows: &[RowRecord]) -> String {
    let columns = export_columns(variant);
    let mut csv_content = String::new();

    csv_content.push_str("S.No");
    for column in &columns {
        csv_content.push(',');
        csv_content.push_str(&escape_csv(column.label));
    }
    csv_content.push('\n');

    for row in rows {
        csv_content.push_str(&row.sno.to_string());
        for column in &columns {
            csv_content.push(',');
            csv_content.push_str(&escape_csv(row.get(column.name)));
        }
        csv_content.push('\n');
    }

    csv_content
}

/// Convert one table to XLSX
///
/// Same columns as [`to_csv`], with a bold header row. Amount columns are
/// written as numbers when they parse; everything else is written as text.
///
/// # Arguments
/// * `variant` - Which table the rows belong to
/// * `rows` - The rows to export, in display order
///
/// # Returns
/// * `Result<Vec<u8>, ExportError>` - XLSX file content as bytes or an error
#[cfg(feature = "web")]
pub fn to_xlsx(variant: RowVariant, rows: &[RowRecord]) -> Result<Vec<u8>, ExportError> {
    use rust_xlsxwriter::{Format, Workbook};

    let columns = export_columns(variant);
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(variant.schema().title)?;

    worksheet.write_string_with_format(0, 0, "S.No", &header)?;
    for (c, column) in columns.iter().enumerate() {
        worksheet.write_string_with_format(0, (c + 1) as u16, column.label, &header)?;
    }

    for (r, row) in rows.iter().enumerate() {
        let line = (r + 1) as u32;
        worksheet.write_number(line, 0, row.sno as f64)?;
        for (c, column) in columns.iter().enumerate() {
            let col = (c + 1) as u16;
            match (column.kind, row.amount(column.name)) {
                (FieldKind::Amount, Some(amount)) => {
                    worksheet.write_number(line, col, amount)?;
                }
                _ => {
                    let value = row.get(column.name);
                    if !value.is_empty() {
                        worksheet.write_string(line, col, value)?;
                    }
                }
            }
        }
    }

    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

#[cfg(not(feature = "web"))]
pub fn to_xlsx(_variant: RowVariant, _rows: &[RowRecord]) -> Result<Vec<u8>, ExportError> {
    Err(ExportError::Unsupported)
}

/// Download name for an exported table, e.g. `bill-tracker.csv`.
pub fn export_filename(variant: RowVariant, extension: &str) -> String {
    format!("{}.{}", variant.slug(), extension)
}

fn export_columns(variant: RowVariant) -> Vec<&'static FieldSpec> {
    variant.schema().columns().collect()
}

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
