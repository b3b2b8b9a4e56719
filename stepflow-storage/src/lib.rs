//! # stepflow-storage
//!
//! Durable storage for stepflow.
//!
//! This crate provides a [`FileStore`] implementing the engine's
//! [`stepflow_core::Store`] contract: one JSON document per definition and
//! per instance, replaced atomically on every write.

pub mod error;
pub mod store;

pub use error::StorageError;
pub use store::FileStore;
