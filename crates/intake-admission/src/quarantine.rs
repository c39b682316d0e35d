//! Quarantine
//!
//! Rejected files are copied to a quarantine container under
//! `<company>/<date>/<original file name>`, tagged with why and where they
//! came from, and then removed from the source container.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

use crate::blob_name::{base_name, ParsedBlobName, UNKNOWN};
use crate::gate::IncomingBlob;
use crate::storage::{BlobMetadata, BlobStore};
use crate::{AdmissionError, Result};

/// Reason code recorded on a quarantined file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    InvalidFilename,
    UnsupportedOrUnknownType,
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFilename => "invalid_filename",
            Self::UnsupportedOrUnknownType => "unsupported_or_unknown_type",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Everything needed to place one file in quarantine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub container: String,
    pub path: String,
    pub reason: RejectionReason,
    pub content_type: Option<String>,
    pub metadata: BlobMetadata,
}

impl QuarantineRecord {
    pub fn build(
        container: &str,
        blob: &IncomingBlob,
        name: &ParsedBlobName,
        reason: RejectionReason,
        now: DateTime<Utc>,
    ) -> Self {
        let date = received_date(&name.received_timestamp).unwrap_or_else(|| now.date_naive());
        let file_name = if name.original_file_name == UNKNOWN {
            base_name(&blob.name)
        } else {
            name.original_file_name.as_str()
        };
        let path = format!(
            "{}/{}/{}",
            path_segment(&name.inbox_or_company),
            date.format("%Y-%m-%d"),
            path_segment(file_name)
        );

        let mut metadata = BlobMetadata::new();
        metadata.insert("sender".to_string(), name.sender_email.clone());
        metadata.insert("original_location".to_string(), blob.location());
        metadata.insert("reason".to_string(), reason.code().to_string());
        metadata.insert("received_at".to_string(), name.received_timestamp.clone());
        metadata.insert("event_id".to_string(), blob.event_id.to_string());
        metadata.insert("content_sha256".to_string(), content_digest(&blob.content));

        Self {
            container: container.to_string(),
            path,
            reason,
            content_type: blob.content_type.clone(),
            metadata,
        }
    }
}

/// Where a file ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineReceipt {
    pub container: String,
    pub path: String,
    pub reason: RejectionReason,
    /// False when the source could not be removed and now exists twice
    pub source_deleted: bool,
}

/// Moves rejected files into the quarantine container.
#[derive(Clone)]
pub struct Quarantine {
    store: Arc<dyn BlobStore>,
    container: String,
}

impl Quarantine {
    pub fn new(store: Arc<dyn BlobStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Write the file to quarantine, then delete the source.
    ///
    /// A failed write is returned as [`AdmissionError::QuarantineWriteFailed`]
    /// and the source is left alone. A failed delete is only logged.
    pub async fn relocate(
        &self,
        blob: &IncomingBlob,
        name: &ParsedBlobName,
        reason: RejectionReason,
    ) -> Result<QuarantineReceipt> {
        let record = QuarantineRecord::build(&self.container, blob, name, reason, Utc::now());

        self.store
            .put(
                &record.container,
                &record.path,
                &blob.content,
                record.content_type.as_deref(),
                &record.metadata,
            )
            .await
            .map_err(|source| AdmissionError::QuarantineWriteFailed {
                path: format!("{}/{}", record.container, record.path),
                source,
            })?;

        let source_deleted = match self.store.delete(&blob.container, &blob.name).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    event_id = %blob.event_id,
                    source = %blob.location(),
                    error = %e,
                    "Quarantined file but could not delete source"
                );
                false
            }
        };

        info!(
            event_id = %blob.event_id,
            source = %blob.location(),
            destination = %format!("{}/{}", record.container, record.path),
            reason = %reason,
            "File quarantined"
        );

        Ok(QuarantineReceipt {
            container: record.container,
            path: record.path,
            reason,
            source_deleted,
        })
    }
}

/// UTC date of a received timestamp, for the formats senders use.
pub fn received_date(timestamp: &str) -> Option<NaiveDate> {
    let timestamp = timestamp.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(parsed.with_timezone(&Utc).date_naive());
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H-%M-%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y%m%dT%H%M%S",
        "%Y%m%d_%H%M%S",
    ];
    let without_zone = timestamp.trim_end_matches('Z');
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(without_zone, format) {
            return Some(parsed.date());
        }
    }

    NaiveDate::parse_from_str(timestamp, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(timestamp, "%Y%m%d"))
        .ok()
}

fn path_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') || c.is_control() { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        UNKNOWN.to_string()
    } else {
        cleaned
    }
}

fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
