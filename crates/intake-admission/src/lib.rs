//! Intake Admission
//!
//! File-type admission gate for attachments dropped into blob storage.
//!
//! # Overview
//!
//! Each blob-created event is decoded, type-checked and either admitted for
//! classification or moved to quarantine:
//!
//! - **Blob names**: sender, inbox and received time are decoded from the
//!   structured blob name ([`blob_name`])
//! - **Sniffing**: the file's leading bytes are matched against known
//!   signatures ([`sniffer`])
//! - **Type decision**: content, name and declared content type are
//!   reconciled into one authoritative type ([`resolver`])
//! - **Quarantine**: rejected files are relocated and tagged ([`quarantine`])
//! - **Classification**: admitted files are classified by an external
//!   service ([`classification`])
//!
//! # Example
//!
//! ```rust,no_run
//! use intake_admission::{AdmissionGate, FsBlobStore, IncomingBlob};
//! use intake_core::IntakeConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> intake_admission::Result<()> {
//! let config = IntakeConfig::default();
//! let store = Arc::new(FsBlobStore::new(&config.storage.root));
//! let gate = AdmissionGate::from_config(&config, store);
//!
//! let blob = IncomingBlob::new(
//!     "attachments",
//!     "alice@co.com-acme-2024-05-01T00:00:00Z-invoice.pdf",
//!     b"%PDF-1.7\n...".to_vec(),
//! );
//! let outcome = gate.process(blob).await?;
//! println!("{:?}", outcome.state());
//! # Ok(())
//! # }
//! ```

pub mod blob_name;
pub mod classification;
pub mod formats;
pub mod gate;
pub mod quarantine;
pub mod resolver;
pub mod sniffer;
pub mod storage;

pub use blob_name::{BlobNameParse, BlobNameParser, NameRejection, ParsedBlobName};
pub use classification::{
    Classification, ClassificationError, ClassificationService, DocumentClassifier,
    HttpClassificationService, OperationHandle, OperationStatus, PollingClassifier, PollingPolicy,
};
pub use formats::FormatPolicy;
pub use gate::{
    AdmissionGate, AdmissionOutcome, AdmittedDocument, ClassificationOutcome, GateDecision,
    GateState, IncomingBlob,
};
pub use quarantine::{Quarantine, QuarantineReceipt, RejectionReason};
pub use resolver::{decide, DecisionSource, TypeDecision};
pub use sniffer::{Confidence, SniffResult, Sniffer};
pub use storage::{BlobMetadata, BlobStore, FsBlobStore, InMemoryBlobStore, StorageError};

/// Admission errors
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The file could not be written to quarantine; the source is untouched.
    #[error("Quarantine write failed for {path}: {source}")]
    QuarantineWriteFailed {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, AdmissionError>;
