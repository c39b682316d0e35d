//! Type Decision Resolver
//!
//! Reconciles the sniffed format, the extension taken from the blob name and
//! the declared content type into one (extension, MIME) pair. Content wins
//! over the name, and the name wins over the sender-declared content type.

use serde::{Deserialize, Serialize};

use crate::formats::{
    extension_for_mime, mime_for_extension, normalize_content_type, normalize_extension,
    FormatPolicy,
};
use crate::sniffer::SniffResult;

/// Which signal produced a [`TypeDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DecisionSource {
    Magic,
    Extension,
    ContentType,
    Unknown,
}

/// Authoritative type for an incoming file.
///
/// `source` is [`DecisionSource::Unknown`] exactly when both fields are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDecision {
    pub file_extension: String,
    pub mime_type: String,
    pub source: DecisionSource,
}

impl TypeDecision {
    pub fn unknown() -> Self {
        Self {
            file_extension: String::new(),
            mime_type: String::new(),
            source: DecisionSource::Unknown,
        }
    }

    fn new(file_extension: &str, mime_type: &str, source: DecisionSource) -> Self {
        Self {
            file_extension: file_extension.to_string(),
            mime_type: mime_type.to_string(),
            source,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.source == DecisionSource::Unknown
    }
}

/// Decide the type of a file. Never fails; falls through to
/// [`TypeDecision::unknown`].
pub fn decide(
    sniff: &SniffResult,
    extension_from_name: &str,
    declared_content_type: Option<&str>,
    policy: &FormatPolicy,
) -> TypeDecision {
    if !sniff.mime.is_empty() && policy.allows_mime(&sniff.mime) {
        let ext = if sniff.ext.is_empty() {
            extension_for_mime(&sniff.mime).unwrap_or_default()
        } else {
            sniff.ext.as_str()
        };
        if !ext.is_empty() {
            let mime = normalize_content_type(&sniff.mime);
            return TypeDecision::new(ext, &mime, DecisionSource::Magic);
        }
    }

    let extension = normalize_extension(extension_from_name);
    if !extension.is_empty() && policy.allows_extension(&extension) {
        if let Some(mime) = mime_for_extension(&extension) {
            return TypeDecision::new(&extension, mime, DecisionSource::Extension);
        }
    }

    if let Some(declared) = declared_content_type {
        let mime = normalize_content_type(declared);
        if !mime.is_empty() && policy.allows_mime(&mime) {
            if let Some(ext) = extension_for_mime(&mime) {
                return TypeDecision::new(ext, &mime, DecisionSource::ContentType);
            }
        }
    }

    TypeDecision::unknown()
}
