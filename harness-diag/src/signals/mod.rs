//! Signal catalog and DBC loader
//!
//! This module contains the catalog schema (messages and signals keyed by CAN
//! identifier) and the DBC reader that produces it.

pub mod dbc;
pub mod database;

// Re-export key types for convenience
pub use database::{
    ByteOrder, Catalog, CatalogStats, MessageDefinition, SignalDefinition, ValueType,
};
