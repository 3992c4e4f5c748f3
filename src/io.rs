//! CSV reading for the import pipeline.
//!
//! All CSV input flows through this module: reader construction (BOM-aware,
//! transcoding to UTF-8), the one-time header-to-field mapping, per-row
//! conversion into import parameters, and the row-counting pass the
//! asynchronous path uses for progress totals.

use std::io::Read;

use csv::StringRecord;
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};
use log::debug;

use crate::error::{ImportError, Result};
use crate::id::FieldId;
use crate::record::{FieldRef, ImportFieldParam, ImportItemParam, RawValue};
use crate::schema::{FieldType, ID_KEY, Schema};
use crate::value::{Coerced, coerce_str};

/// Builds a CSV reader over an arbitrary byte stream. The stream is decoded
/// to UTF-8 first so BOM-prefixed and legacy-encoded exports parse the same
/// as clean input.
pub fn open_csv_reader<R: Read>(reader: R) -> csv::Reader<DecodeReaderBytes<R, Vec<u8>>> {
    let decoded = DecodeReaderBytesBuilder::new().build(reader);
    csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .double_quote(true)
        .flexible(false)
        .from_reader(decoded)
}

pub fn reader_headers<R: Read>(reader: &mut csv::Reader<R>) -> Result<StringRecord> {
    reader
        .headers()
        .map(Clone::clone)
        .map_err(|err| ImportError::Decode(err.to_string()))
}

/// What one CSV column contributes to a record.
#[derive(Debug, Clone)]
pub enum ColumnTarget {
    /// The reserved `id` column.
    Id,
    /// A header that resolved to a schema field; cells coerce to its type.
    Field(FieldId, FieldType),
    /// An unmapped header, preserved as an opaque string value and left for
    /// the resolver to accept or reject.
    Opaque(String),
}

/// Maps the header row against the schema, by key. Computed once per run,
/// after inference has had its chance to extend the schema.
pub fn header_targets(headers: &StringRecord, schema: &Schema) -> Vec<ColumnTarget> {
    headers
        .iter()
        .map(|header| {
            if header == ID_KEY {
                ColumnTarget::Id
            } else if let Some(field) = schema.field_by_key(header) {
                ColumnTarget::Field(field.id, field.field_type.clone())
            } else {
                ColumnTarget::Opaque(header.to_string())
            }
        })
        .collect()
}

/// Converts one data row into import parameters.
///
/// Cells that fail coercion are dropped at field granularity; empty cells
/// are omitted rather than set to zero values. A malformed `id` cell is a
/// hard error.
pub fn row_to_param(targets: &[ColumnTarget], row: &StringRecord) -> Result<ImportItemParam> {
    let mut param = ImportItemParam::default();
    for (idx, target) in targets.iter().enumerate() {
        let cell = row.get(idx).unwrap_or("");
        match target {
            ColumnTarget::Id => {
                if cell.is_empty() {
                    continue;
                }
                let id = cell
                    .parse()
                    .map_err(|_| ImportError::InvalidItemId(cell.to_string()))?;
                param.item = Some(id);
            }
            ColumnTarget::Field(field, ty) => match coerce_str(cell, ty) {
                Coerced::Ok(value) => param.fields.push(ImportFieldParam {
                    field: FieldRef::Id(*field),
                    value: RawValue::Typed(value),
                }),
                Coerced::Absent => {}
                Coerced::Invalid => {
                    debug!("dropping cell '{cell}' for {} field {field}", ty.as_str());
                }
            },
            ColumnTarget::Opaque(key) => {
                if cell.is_empty() {
                    continue;
                }
                param.fields.push(ImportFieldParam {
                    field: FieldRef::Key(key.clone()),
                    value: RawValue::Str(cell.to_string()),
                });
            }
        }
    }
    Ok(param)
}

/// The ordered header/cell pairs of the first data row, as inference input.
pub fn first_row_pairs(
    headers: &StringRecord,
    row: &StringRecord,
) -> Vec<(String, serde_json::Value)> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let cell = row.get(idx).unwrap_or("");
            (header.to_string(), serde_json::Value::String(cell.to_string()))
        })
        .collect()
}

/// Counts the data rows of a CSV stream. The asynchronous path spends one
/// full read on this so reported progress carries an exact total.
pub fn count_records<R: Read>(reader: R) -> Result<usize> {
    let mut reader = open_csv_reader(reader);
    reader_headers(&mut reader)?;
    let mut count = 0usize;
    let mut record = csv::ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => count += 1,
            Ok(false) => break,
            Err(err) => return Err(ImportError::Decode(err.to_string())),
        }
    }
    Ok(count)
}
