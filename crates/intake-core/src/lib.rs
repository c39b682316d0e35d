//! Core configuration for the document intake admission gate.
//!
//! Everything the gate needs to know at process start lives here: where
//! blobs are stored, which formats are admitted, which blob naming grammar
//! is in force and how the classification collaborator is polled.

pub mod config;
pub mod error;

pub use config::{
    AdmissionConfig, BlobNameGrammar, ClassificationConfig, IntakeConfig, StorageConfig,
    WorkerConfig, ENV_PREFIX,
};
pub use error::{ConfigError, Result};
