//! Resource types shared across sluice crates.
//!
//! This crate contains the destination identity used to key ingestion
//! channels, the column quoting rule, and the row and value types that flow
//! from the record readers to the ingestion service.

mod column;
mod destination;
mod row;
mod value;

pub use self::{
    column::quote_column,
    destination::{DEFAULT_CHANNEL_NAME, DestinationIdentity, ResourceError, ResourceResult},
    row::Row,
    value::Value,
};
