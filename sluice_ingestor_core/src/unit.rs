use std::{collections::HashMap, fmt, io::Read};

use bytes::{Buf, Bytes};
use bytesize::ByteSize;
use uuid::Uuid;

/// A unit of work handed over by the upstream engine.
///
/// Units are immutable. Each one is processed once and routed to exactly one
/// relationship.
#[derive(Clone)]
pub struct IngestionUnit {
    id: Uuid,
    attributes: HashMap<String, String>,
    content: Bytes,
}

impl IngestionUnit {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            attributes: HashMap::new(),
            content: content.into(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// The body size, in bytes.
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// Returns a reader over the body.
    pub fn read(&self) -> impl Read + Send + 'static {
        self.content.clone().reader()
    }
}

impl fmt::Debug for IngestionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionUnit")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("size", &ByteSize::b(self.size()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_body() {
        let unit = IngestionUnit::new("hello").with_attribute("filename", "a.txt");

        let mut body = String::new();
        unit.read().read_to_string(&mut body).unwrap();

        assert_eq!(body, "hello");
        assert_eq!(unit.size(), 5);
        assert_eq!(unit.attribute("filename"), Some("a.txt"));
    }

    #[test]
    fn test_units_have_distinct_ids() {
        assert_ne!(IngestionUnit::new("").id(), IngestionUnit::new("").id());
    }
}
