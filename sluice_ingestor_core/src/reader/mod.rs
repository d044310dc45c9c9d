//! Record decoding contract.
//!
//! A [`RecordReaderFactory`] turns the body of a unit into a [`RecordReader`],
//! which exposes the record schema and a forward-only sequence of records.

mod json;

use std::{collections::HashMap, fmt, io::Read, sync::Arc};

use snafu::Snafu;
use sluice_resources::Value;

pub use self::json::JsonLinesReaderFactory;

/// Errors raised while decoding records.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    #[snafu(display("input is empty and no schema is configured"))]
    EmptyInput,
    #[snafu(display("line {line} is not a JSON object"))]
    NotAnObject { line: usize },
    #[snafu(display("line {line} is not valid JSON: {source}"))]
    InvalidJson {
        line: usize,
        #[snafu(source(from(serde_json::Error, Arc::new)))]
        source: Arc<serde_json::Error>,
    },
    #[snafu(display("failed to read input: {source}"))]
    Read {
        #[snafu(source(from(std::io::Error, Arc::new)))]
        source: Arc<std::io::Error>,
    },
    #[snafu(display("invalid value for field {field} of type {expected}: {message}"))]
    InvalidValue {
        field: String,
        expected: FieldType,
        message: String,
    },
}

pub type ReaderResult<T, E = ReaderError> = std::result::Result<T, E>;

/// The type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    String,
    Date,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    pub name: String,
    pub field_type: FieldType,
}

/// The ordered fields of the records produced by a reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSchema {
    fields: Vec<RecordField>,
}

/// One decoded record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: HashMap<String, Value>,
}

pub trait RecordReader: Send {
    fn schema(&self) -> &RecordSchema;

    /// Returns the next record, or `None` once the input is exhausted.
    fn next_record(&mut self) -> ReaderResult<Option<Record>>;
}

pub trait RecordReaderFactory: Send + Sync {
    /// Creates a reader over a unit's body.
    ///
    /// Fails if the input can't be decoded at all, for example because its
    /// schema can't be determined.
    fn create_reader(
        &self,
        attributes: &HashMap<String, String>,
        input: Box<dyn Read + Send>,
        size: u64,
    ) -> ReaderResult<Box<dyn RecordReader>>;
}

impl RecordField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

impl RecordSchema {
    pub fn new(fields: Vec<RecordField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Record {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    /// The field's value, null if the record doesn't have it.
    pub fn value(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&Value::Null)
    }

    /// The field's string representation, `None` for null or missing fields.
    pub fn as_string(&self, field: &str) -> Option<String> {
        self.value(field).as_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Float => write!(f, "float"),
            FieldType::String => write!(f, "string"),
            FieldType::Date => write!(f, "date"),
            FieldType::Timestamp => write!(f, "timestamp"),
        }
    }
}
