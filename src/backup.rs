use bincode::{deserialize_from, serialize_into};
use chrono::NaiveDateTime;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::record::RowRecord;
use crate::schema::RowVariant;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backup encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// All three tracker tables together.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Workbook {
    pub saved_at: Option<NaiveDateTime>,
    pub contractors: Vec<RowRecord>,
    pub bills: Vec<RowRecord>,
    pub epbg: Vec<RowRecord>,
}

impl Workbook {
    pub fn table(&self, variant: RowVariant) -> &[RowRecord] {
        match variant {
            RowVariant::ContractorList => &self.contractors,
            RowVariant::BillTracker => &self.bills,
            RowVariant::Epbg => &self.epbg,
        }
    }

    pub fn table_mut(&mut self, variant: RowVariant) -> &mut Vec<RowRecord> {
        match variant {
            RowVariant::ContractorList => &mut self.contractors,
            RowVariant::BillTracker => &mut self.bills,
            RowVariant::Epbg => &mut self.epbg,
        }
    }

    pub fn row_count(&self) -> usize {
        self.contractors.len() + self.bills.len() + self.epbg.len()
    }
}

/// Write the workbook as gzip-compressed bincode.
pub fn save_workbook(workbook: &Workbook, path: impl AsRef<Path>) -> Result<(), BackupError> {
    let file = File::create(path)?;
    write_workbook(workbook, file)?;
    Ok(())
}

pub fn load_workbook(path: impl AsRef<Path>) -> Result<Workbook, BackupError> {
    let file = File::open(path)?;
    read_workbook(file)
}

pub fn workbook_to_bytes(workbook: &Workbook) -> Result<Vec<u8>, BackupError> {
    write_workbook(workbook, Vec::new())
}

pub fn workbook_from_bytes(bytes: &[u8]) -> Result<Workbook, BackupError> {
    read_workbook(bytes)
}

fn write_workbook<W: Write>(workbook: &Workbook, sink: W) -> Result<W, BackupError> {
    let encoder = GzEncoder::new(sink, Compression::default());
    let mut writer = BufWriter::new(encoder);
    serialize_into(&mut writer, workbook)?;
    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(encoder.finish()?)
}

fn read_workbook<R: Read>(source: R) -> Result<Workbook, BackupError> {
    let mut reader = BufReader::new(GzDecoder::new(source));
    Ok(deserialize_from(&mut reader)?)
}
