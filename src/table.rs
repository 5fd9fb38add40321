//! CSV persistence for fingerprint collections.
//!
//! Layout: a header row `filename,<FIELD_NAMES...>`, then one row per
//! recording. Filenames are quoted when they contain a comma, a quote or a
//! line break; floats use Rust's shortest round-trip formatting so a
//! write/read cycle preserves every value exactly.

use crate::fingerprint::{DIM, FIELD_NAMES, Fingerprint, FingerprintCollection, FingerprintRecord};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const FILENAME_COLUMN: &str = "filename";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Fingerprint table not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("Bad header: {0}")]
    Header(String),
    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TableError>;

/// Write the collection to `path`, replacing any existing file.
pub fn write_table(path: &Path, collection: &FingerprintCollection) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    let mut out = BufWriter::new(file);
    write_records(&mut out, collection)?;
    out.flush()?;
    Ok(())
}

/// Read a table written by [`write_table`] (or any CSV with the same columns,
/// in any order).
pub fn read_table(path: &Path) -> Result<FingerprintCollection> {
    if !path.exists() {
        return Err(TableError::Missing(path.to_path_buf()));
    }
    let file = std::fs::File::open(path)?;
    read_records(BufReader::new(file))
}

pub fn write_records<W: Write>(out: &mut W, collection: &FingerprintCollection) -> Result<()> {
    write!(out, "{}", FILENAME_COLUMN)?;
    for name in FIELD_NAMES {
        write!(out, ",{}", name)?;
    }
    writeln!(out)?;

    for record in collection.iter() {
        write!(out, "{}", quote(&record.filename))?;
        for v in record.fingerprint.to_array() {
            write!(out, ",{}", v)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Write a `filename,cluster` CSV, one row per training recording.
pub fn write_assignments(
    path: &Path,
    collection: &FingerprintCollection,
    labels: &[usize],
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut out = BufWriter::new(std::fs::File::create(path)?);
    writeln!(out, "{},cluster", FILENAME_COLUMN)?;
    for (record, label) in collection.iter().zip(labels) {
        writeln!(out, "{},{}", quote(&record.filename), label)?;
    }
    out.flush()?;
    Ok(())
}

pub fn read_records<R: BufRead>(mut reader: R) -> Result<FingerprintCollection> {
    let mut line_no = 0;

    let header = match next_record(&mut reader, &mut line_no)? {
        Some((_, row)) => split_row(&row).map_err(TableError::Header)?,
        None => return Err(TableError::Header("empty file".to_string())),
    };
    let layout = ColumnLayout::from_header(&header)?;

    let mut records = Vec::new();
    while let Some((start, row)) = next_record(&mut reader, &mut line_no)? {
        if row.trim().is_empty() {
            continue;
        }
        let cells = split_row(&row).map_err(|message| TableError::Parse {
            line: start,
            message,
        })?;
        records.push(layout.parse_row(&cells, start)?);
    }

    Ok(records.into_iter().collect())
}

/// Read one CSV record and the line it starts on. A quoted cell may span
/// several physical lines; the line break inside it is kept verbatim.
fn next_record<R: BufRead>(
    reader: &mut R,
    line_no: &mut usize,
) -> Result<Option<(usize, String)>> {
    let mut record = String::new();
    let start = *line_no + 1;
    loop {
        let read = reader.read_line(&mut record)?;
        if read == 0 {
            break;
        }
        *line_no += 1;
        // An even number of quotes means every quoted cell is closed.
        if record.matches('"').count() % 2 == 0 {
            break;
        }
    }
    if record.is_empty() {
        return Ok(None);
    }
    if record.ends_with('\n') {
        record.pop();
        if record.ends_with('\r') {
            record.pop();
        }
    }
    Ok(Some((start, record)))
}

/// Position of each expected column in the file's header.
struct ColumnLayout {
    filename: usize,
    fields: [usize; DIM],
    width: usize,
}

impl ColumnLayout {
    fn from_header(header: &[String]) -> Result<Self> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| TableError::Header(format!("missing column '{}'", name)))
        };
        let filename = find(FILENAME_COLUMN)?;
        let mut fields = [0usize; DIM];
        for (slot, name) in fields.iter_mut().zip(FIELD_NAMES) {
            *slot = find(name)?;
        }
        Ok(Self {
            filename,
            fields,
            width: header.len(),
        })
    }

    fn parse_row(&self, cells: &[String], line: usize) -> Result<FingerprintRecord> {
        if cells.len() != self.width {
            return Err(TableError::Parse {
                line,
                message: format!("expected {} columns, found {}", self.width, cells.len()),
            });
        }
        let mut values = [0.0f64; DIM];
        for (d, &col) in self.fields.iter().enumerate() {
            let cell = cells[col].trim();
            values[d] = cell.parse::<f64>().map_err(|e| TableError::Parse {
                line,
                message: format!("{} = '{}': {}", FIELD_NAMES[d], cell, e),
            })?;
        }
        Ok(FingerprintRecord {
            filename: cells[self.filename].clone(),
            fingerprint: Fingerprint::from_array(values),
        })
    }
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one CSV row, honoring double-quoted cells.
fn split_row(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    cell.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if cell.is_empty() => in_quotes = true,
            ',' if !in_quotes => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    cells.push(cell);
    Ok(cells)
}
