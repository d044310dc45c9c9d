//! Conversion of records, or raw unit bodies, into rows.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value as JsonValue};
use snafu::ResultExt;
use sluice_resources::{Row, Value, quote_column};
use tracing::debug;

use crate::{
    error::{DecodeSnafu, IngestError, IoSnafu, Result, SerializeSnafu},
    reader::{FieldType, Record, RecordField, RecordSchema, ReaderError},
};

pub const DEFAULT_TARGET_COLUMN: &str = "col1";
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "INGESTED_AT";

/// How a record, or a unit body, becomes a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformMode {
    /// One column per record field.
    FieldWise,
    /// The whole unit body, as text, in a single column.
    Raw { target_column: String },
    /// Each record as one JSON object, in a single column.
    Variant {
        target_column: String,
        encoding: VariantEncoding,
    },
}

/// How field values are encoded in the JSON object of variant mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariantEncoding {
    /// Every value is encoded as its string representation.
    #[default]
    Stringified,
    /// Numbers and booleans stay native JSON values.
    Typed,
}

#[derive(Debug, Clone)]
pub struct RowBuilder {
    mode: TransformMode,
    timestamp_column: Option<String>,
}

impl TransformMode {
    pub fn raw(target_column: impl Into<String>) -> Self {
        TransformMode::Raw {
            target_column: target_column.into(),
        }
    }

    pub fn variant(target_column: impl Into<String>) -> Self {
        TransformMode::Variant {
            target_column: target_column.into(),
            encoding: VariantEncoding::default(),
        }
    }

    pub fn typed_variant(target_column: impl Into<String>) -> Self {
        TransformMode::Variant {
            target_column: target_column.into(),
            encoding: VariantEncoding::Typed,
        }
    }

    /// Returns true if rows are built from decoded records.
    pub fn reads_records(&self) -> bool {
        !matches!(self, TransformMode::Raw { .. })
    }
}

impl RowBuilder {
    pub fn new(mode: TransformMode) -> Self {
        Self {
            mode,
            timestamp_column: None,
        }
    }

    /// Adds the current UTC time to every row, in the given column.
    ///
    /// The timestamp replaces any value with the same column name.
    pub fn with_ingestion_timestamp(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    pub fn mode(&self) -> &TransformMode {
        &self.mode
    }

    /// Builds the row of one decoded record.
    pub fn build_record_row(&self, schema: &RecordSchema, record: &Record) -> Result<Row> {
        let mut row = match &self.mode {
            TransformMode::FieldWise => field_wise_row(schema, record)?,
            TransformMode::Variant {
                target_column,
                encoding,
            } => variant_row(schema, record, target_column, *encoding)?,
            TransformMode::Raw { .. } => {
                return Err(IngestError::Configuration {
                    message: "raw mode doesn't build rows from records".to_string(),
                });
            }
        };

        self.add_timestamp(&mut row);
        Ok(row)
    }

    /// Builds the single row of a raw unit body.
    ///
    /// Lines end at `\n`, `\r\n` or a lone `\r`, and are re-joined with `\n`
    /// without a trailing newline.
    pub fn build_raw_row(&self, body: &[u8]) -> Result<Row> {
        let TransformMode::Raw { target_column } = &self.mode else {
            return Err(IngestError::Configuration {
                message: "only raw mode builds rows from the unit body".to_string(),
            });
        };

        let text = std::str::from_utf8(body)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
            .context(IoSnafu {
                message: "unit body is not valid UTF-8",
            })?;

        let content = text
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .lines()
            .collect::<Vec<_>>()
            .join("\n");

        let column = quote_column(target_column);
        debug!(%column, bytes = content.len(), "raw column added");

        let mut row = Row::with_capacity(2);
        row.insert(column, content);

        self.add_timestamp(&mut row);
        Ok(row)
    }

    fn add_timestamp(&self, row: &mut Row) {
        if matches!(self.mode, TransformMode::FieldWise) {
            return;
        }

        if let Some(column) = &self.timestamp_column {
            let column = quote_column(column);
            debug!(%column, "ingestion timestamp added");
            row.insert(column, Value::Timestamp(Utc::now().naive_utc()));
        }
    }
}

fn field_wise_row(schema: &RecordSchema, record: &Record) -> Result<Row> {
    let mut row = Row::with_capacity(schema.len());

    for field in schema.fields() {
        let value = record.value(&field.name).clone();
        let value = match field.field_type {
            FieldType::Date => normalize_date(field, value).context(DecodeSnafu)?,
            _ => value,
        };

        let column = quote_column(&field.name);
        debug!(%column, value_type = value.type_name(), "column added");
        row.insert(column, value);
    }

    Ok(row)
}

fn variant_row(
    schema: &RecordSchema,
    record: &Record,
    target_column: &str,
    encoding: VariantEncoding,
) -> Result<Row> {
    let mut object = Map::with_capacity(schema.len());

    for field in schema.fields() {
        let value = record.value(&field.name);
        let json = match encoding {
            VariantEncoding::Stringified => value
                .as_string()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
            VariantEncoding::Typed => value.to_json(),
        };
        object.insert(field.name.clone(), json);
    }

    let content = serde_json::to_string(&JsonValue::Object(object)).context(SerializeSnafu)?;

    let column = quote_column(target_column);
    debug!(%column, fields = schema.len(), "variant column added");

    let mut row = Row::with_capacity(2);
    row.insert(column, content);
    Ok(row)
}

/// Drops the time of day of a date field's value.
///
/// Timestamps keep the calendar date in their own offset.
fn normalize_date(field: &RecordField, value: Value) -> std::result::Result<Value, ReaderError> {
    let date = match value {
        Value::Null | Value::Date(_) => return Ok(value),
        Value::Timestamp(timestamp) => timestamp.date(),
        Value::TimestampTz(timestamp) => timestamp.date_naive(),
        Value::String(ref s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.date_naive()))
            .ok_or_else(|| ReaderError::InvalidValue {
                field: field.name.clone(),
                expected: FieldType::Date,
                message: s.clone(),
            })?,
        other => {
            return Err(ReaderError::InvalidValue {
                field: field.name.clone(),
                expected: FieldType::Date,
                message: format!("cannot convert {} to a date", other.type_name()),
            });
        }
    };

    Ok(Value::Date(date))
}
