//! Channel management for streaming ingestion.
//!
//! The [`ChannelRegistry`] holds the client of the remote ingestion service
//! and caches one open channel per destination. The service itself is
//! abstracted behind [`IngestService`] so that it can be replaced with an
//! in-memory implementation in tests and local runs.

mod config;
mod error;
mod metrics;
mod outcome;
mod registry;
mod service;

pub use self::{
    config::{ConnectionConfig, DEFAULT_CLIENT_NAME},
    error::{ChannelError, Result, ServiceError},
    outcome::{InsertError, InsertOutcome},
    registry::{ChannelHandle, ChannelRegistry},
    service::{
        IngestChannel, IngestService, IngestServiceFactory, OnErrorOption, OpenChannelRequest,
        ServiceResult,
    },
};
