//! Stowage Core Library
//!
//! This crate provides the domain models, identifiers and configuration shared
//! by the storage backends, the metadata repository and the CLI.

pub mod config;
pub mod models;
pub mod storage_types;
pub mod uid;

// Re-export commonly used types
pub use config::{Config, HandlerConfig};
pub use models::{FileRecord, FileStatus};
pub use storage_types::HandlerKind;
pub use uid::{Uid, UidParseError};
