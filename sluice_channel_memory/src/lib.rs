mod service;
mod table;

pub use self::{
    service::{InMemoryChannel, InMemoryIngestService},
    table::{ColumnDefinition, ColumnType, TableDefinition},
};
