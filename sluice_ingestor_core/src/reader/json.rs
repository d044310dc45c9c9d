use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Lines, Read},
};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value as JsonValue};
use snafu::ResultExt;
use sluice_resources::Value;
use tracing::debug;

use super::{
    FieldType, InvalidJsonSnafu, ReadSnafu, Record, RecordField, RecordReader,
    RecordReaderFactory, RecordSchema, ReaderError, ReaderResult,
};

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Reads newline delimited JSON objects.
///
/// Without an explicit schema, the schema is inferred from the first object
/// in key order.
#[derive(Debug, Clone, Default)]
pub struct JsonLinesReaderFactory {
    schema: Option<RecordSchema>,
}

struct JsonLinesReader {
    schema: RecordSchema,
    lines: Lines<BufReader<Box<dyn Read + Send>>>,
    line: usize,
    peeked: Option<Map<String, JsonValue>>,
}

impl JsonLinesReaderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: RecordSchema) -> Self {
        Self {
            schema: Some(schema),
        }
    }
}

impl RecordReaderFactory for JsonLinesReaderFactory {
    fn create_reader(
        &self,
        _attributes: &HashMap<String, String>,
        input: Box<dyn Read + Send>,
        size: u64,
    ) -> ReaderResult<Box<dyn RecordReader>> {
        let mut reader = JsonLinesReader {
            schema: RecordSchema::default(),
            lines: BufReader::new(input).lines(),
            line: 0,
            peeked: None,
        };

        reader.schema = match &self.schema {
            Some(schema) => schema.clone(),
            None => {
                let first = reader.next_object()?.ok_or(ReaderError::EmptyInput)?;
                let schema = infer_schema(&first);
                reader.peeked = Some(first);
                schema
            }
        };

        debug!(size, fields = reader.schema.len(), "json lines reader created");

        Ok(Box::new(reader))
    }
}

impl JsonLinesReader {
    fn next_object(&mut self) -> ReaderResult<Option<Map<String, JsonValue>>> {
        for line in self.lines.by_ref() {
            let line = line.context(ReadSnafu)?;
            self.line += 1;

            if line.trim().is_empty() {
                continue;
            }

            let value: JsonValue =
                serde_json::from_str(&line).context(InvalidJsonSnafu { line: self.line })?;

            return match value {
                JsonValue::Object(object) => Ok(Some(object)),
                _ => Err(ReaderError::NotAnObject { line: self.line }),
            };
        }

        Ok(None)
    }
}

impl RecordReader for JsonLinesReader {
    fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    fn next_record(&mut self) -> ReaderResult<Option<Record>> {
        let object = match self.peeked.take() {
            Some(object) => object,
            None => match self.next_object()? {
                Some(object) => object,
                None => return Ok(None),
            },
        };

        let mut values = HashMap::with_capacity(self.schema.len());
        for field in self.schema.fields() {
            let value = match object.get(&field.name) {
                None => Value::Null,
                Some(json) => coerce(field, json)?,
            };
            values.insert(field.name.clone(), value);
        }

        Ok(Some(Record::new(values)))
    }
}

fn infer_schema(object: &Map<String, JsonValue>) -> RecordSchema {
    let fields = object
        .iter()
        .map(|(name, value)| {
            let field_type = match value {
                JsonValue::Bool(_) => FieldType::Boolean,
                JsonValue::Number(n) if n.is_i64() => FieldType::Integer,
                JsonValue::Number(_) => FieldType::Float,
                _ => FieldType::String,
            };
            RecordField::new(name.clone(), field_type)
        })
        .collect();

    RecordSchema::new(fields)
}

fn coerce(field: &RecordField, json: &JsonValue) -> ReaderResult<Value> {
    let invalid = |message: &str| ReaderError::InvalidValue {
        field: field.name.clone(),
        expected: field.field_type,
        message: message.to_string(),
    };

    let value = match (field.field_type, json) {
        (_, JsonValue::Null) => Value::Null,
        (FieldType::Boolean, JsonValue::Bool(b)) => Value::Boolean(*b),
        (FieldType::Boolean, JsonValue::String(s)) => match s.to_lowercase().as_str() {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            _ => return Err(invalid(s)),
        },
        (FieldType::Integer, JsonValue::Number(n)) => {
            Value::Integer(n.as_i64().ok_or_else(|| invalid(&n.to_string()))?)
        }
        (FieldType::Integer, JsonValue::String(s)) => {
            Value::Integer(s.trim().parse().map_err(|_| invalid(s))?)
        }
        (FieldType::Float, JsonValue::Number(n)) => {
            Value::Float(n.as_f64().ok_or_else(|| invalid(&n.to_string()))?)
        }
        (FieldType::Float, JsonValue::String(s)) => {
            Value::Float(s.trim().parse().map_err(|_| invalid(s))?)
        }
        (FieldType::String, JsonValue::String(s)) => Value::String(s.clone()),
        (FieldType::String, other) => Value::String(other.to_string()),
        (FieldType::Date, JsonValue::String(s)) => {
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                Value::Date(date)
            } else {
                parse_timestamp(s).ok_or_else(|| invalid(s))?
            }
        }
        (FieldType::Timestamp, JsonValue::String(s)) => {
            parse_timestamp(s).ok_or_else(|| invalid(s))?
        }
        (_, other) => return Err(invalid(&other.to_string())),
    };

    Ok(value)
}

fn parse_timestamp(s: &str) -> Option<Value> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(s) {
        return Some(Value::TimestampTz(timestamp));
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(Value::Timestamp)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::NaiveDate;

    use super::*;

    fn read_all(factory: &JsonLinesReaderFactory, input: &str) -> ReaderResult<(RecordSchema, Vec<Record>)> {
        let input: Box<dyn Read + Send> = Box::new(Cursor::new(input.as_bytes().to_vec()));
        let mut reader = factory.create_reader(&HashMap::new(), input, 0)?;

        let mut records = Vec::new();
        while let Some(record) = reader.next_record()? {
            records.push(record);
        }

        Ok((reader.schema().clone(), records))
    }

    #[test]
    fn test_infer_schema_in_key_order() {
        let (schema, records) = read_all(
            &JsonLinesReaderFactory::new(),
            "{\"name\":\"Ann\",\"id\":1,\"score\":1.5,\"active\":true,\"tags\":[1,2]}\n\n{\"name\":\"Bob\",\"id\":2}\n",
        )
        .unwrap();

        let names = schema.fields().iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["name", "id", "score", "active", "tags"]);
        assert_eq!(schema.field("id").unwrap().field_type, FieldType::Integer);
        assert_eq!(schema.field("score").unwrap().field_type, FieldType::Float);
        assert_eq!(schema.field("tags").unwrap().field_type, FieldType::String);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_string("tags").as_deref(), Some("[1,2]"));
        assert_eq!(records[1].value("score"), &Value::Null);
        assert_eq!(records[1].as_string("id").as_deref(), Some("2"));
    }

    #[test]
    fn test_empty_input_without_schema() {
        let err = read_all(&JsonLinesReaderFactory::new(), "\n  \n").unwrap_err();
        assert!(matches!(err, ReaderError::EmptyInput));
    }

    #[test]
    fn test_empty_input_with_schema() {
        let factory = JsonLinesReaderFactory::with_schema(RecordSchema::new(vec![
            RecordField::new("id", FieldType::Integer),
        ]));
        let (_, records) = read_all(&factory, "").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_first_line_not_an_object() {
        let err = read_all(&JsonLinesReaderFactory::new(), "[1, 2]\n").unwrap_err();
        assert!(matches!(err, ReaderError::NotAnObject { line: 1 }));
    }

    #[test]
    fn test_malformed_later_line() {
        let input: Box<dyn Read + Send> =
            Box::new(Cursor::new(b"{\"id\":1}\n{\"id\":\n".to_vec()));
        let mut reader = JsonLinesReaderFactory::new()
            .create_reader(&HashMap::new(), input, 0)
            .unwrap();

        assert!(reader.next_record().unwrap().is_some());
        let err = reader.next_record().unwrap_err();
        assert!(matches!(err, ReaderError::InvalidJson { line: 2, .. }));
    }

    #[test]
    fn test_coerce_dates_and_timestamps() {
        let factory = JsonLinesReaderFactory::with_schema(RecordSchema::new(vec![
            RecordField::new("day", FieldType::Date),
            RecordField::new("at", FieldType::Timestamp),
            RecordField::new("local", FieldType::Timestamp),
        ]));

        let (_, records) = read_all(
            &factory,
            "{\"day\":\"2024-03-01\",\"at\":\"2024-03-01T23:30:00-05:00\",\"local\":\"2024-03-01 08:00:00\"}",
        )
        .unwrap();

        let record = &records[0];
        assert_eq!(
            record.value("day"),
            &Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert!(matches!(record.value("at"), Value::TimestampTz(_)));
        assert!(matches!(record.value("local"), Value::Timestamp(_)));
    }

    #[test]
    fn test_invalid_value() {
        let factory = JsonLinesReaderFactory::with_schema(RecordSchema::new(vec![
            RecordField::new("id", FieldType::Integer),
        ]));

        let err = read_all(&factory, "{\"id\":\"one\"}").unwrap_err();
        assert!(matches!(
            err,
            ReaderError::InvalidValue {
                expected: FieldType::Integer,
                ..
            }
        ));
    }
}
