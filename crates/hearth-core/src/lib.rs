//! Core types and shared utilities for the hearth ingestion pipeline.
//!
//! This crate provides:
//! - The event records that flow through the pipeline (raw, flat, enriched,
//!   normalized)
//! - Prometheus metrics helpers and metric descriptions
//! - Shared error types

mod error;
pub mod event;
pub mod metrics;

pub use error::{Error, Result};
pub use event::{
    EnrichedEvent, EnrichmentContext, EventContext, FlatEvent, NormalizedEvent, RawEvent,
    RawEventData, RawStateObject, SCHEMA_VERSION, StateChange, StateSnapshot, TimeOfDay,
};
