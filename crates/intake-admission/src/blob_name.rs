//! Blob-Name Parser
//!
//! Incoming attachments are stored under structured names that encode who
//! sent them, which inbox received them and when. Two naming conventions are
//! in use; the deployment picks one through [`BlobNameGrammar`].
//!
//! - Hyphen: `alice@co.com-acme-2024-05-01T00:00:00Z-invoice.pdf`
//! - Parenthesized: `2024-05-01T00-00-00Z(alice@co.com)invoice.pdf`

use chrono::{SecondsFormat, Utc};
use intake_core::{AdmissionConfig, BlobNameGrammar};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::formats::{extension_of, FormatPolicy};
use crate::quarantine::RejectionReason;

/// Placeholder for fields a name did not provide.
pub const UNKNOWN: &str = "unknown";

static PARENTHESIZED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<timestamp>[^()]+)\((?P<sender>[^()]+)\)(?P<file>.+)$")
        .expect("parenthesized blob name pattern is valid")
});

/// Identity decoded from a blob name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedBlobName {
    pub sender_email: String,
    pub inbox_or_company: String,
    pub received_timestamp: String,
    pub original_file_name: String,
    /// Extension of the original file name, normalized; may be empty
    pub extension: String,
}

impl ParsedBlobName {
    /// Record used when a name does not match the grammar.
    pub fn fallback() -> Self {
        Self {
            sender_email: UNKNOWN.to_string(),
            inbox_or_company: UNKNOWN.to_string(),
            received_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            original_file_name: UNKNOWN.to_string(),
            extension: String::new(),
        }
    }
}

/// Why a name was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameRejection {
    BadFormat,
    UnsupportedType,
}

impl NameRejection {
    pub fn reason(&self) -> RejectionReason {
        match self {
            Self::BadFormat => RejectionReason::InvalidFilename,
            Self::UnsupportedType => RejectionReason::UnsupportedOrUnknownType,
        }
    }
}

/// Outcome of parsing. Always carries a name, the fallback record when
/// nothing could be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobNameParse {
    pub name: ParsedBlobName,
    pub rejection: Option<NameRejection>,
}

impl BlobNameParse {
    fn valid(name: ParsedBlobName) -> Self {
        Self {
            name,
            rejection: None,
        }
    }

    fn rejected(name: ParsedBlobName, rejection: NameRejection) -> Self {
        Self {
            name,
            rejection: Some(rejection),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Parser for one naming grammar.
#[derive(Debug, Clone)]
pub struct BlobNameParser {
    grammar: BlobNameGrammar,
    company_from_sender_domain: bool,
    policy: Arc<FormatPolicy>,
}

impl BlobNameParser {
    pub fn new(grammar: BlobNameGrammar, policy: Arc<FormatPolicy>) -> Self {
        Self {
            grammar,
            company_from_sender_domain: false,
            policy,
        }
    }

    pub fn from_config(config: &AdmissionConfig, policy: Arc<FormatPolicy>) -> Self {
        Self::new(config.blob_name_grammar, policy)
            .with_company_from_sender_domain(config.company_from_sender_domain)
    }

    /// Replace the embedded inbox with the sender's email domain.
    pub fn with_company_from_sender_domain(mut self, enabled: bool) -> Self {
        self.company_from_sender_domain = enabled;
        self
    }

    pub fn grammar(&self) -> BlobNameGrammar {
        self.grammar
    }

    /// Parse a blob name. Directory prefixes are ignored.
    pub fn parse(&self, blob_name: &str) -> BlobNameParse {
        let base = base_name(blob_name);
        match self.grammar {
            BlobNameGrammar::Hyphen => self.parse_hyphen(base),
            BlobNameGrammar::Parenthesized => self.parse_parenthesized(base),
        }
    }

    fn parse_hyphen(&self, base: &str) -> BlobNameParse {
        let parts: Vec<&str> = base.split('-').collect();
        if parts.len() < 4 {
            return BlobNameParse::rejected(ParsedBlobName::fallback(), NameRejection::BadFormat);
        }

        // ISO dates contain hyphens; keep YYYY-MM-DD... together when a file
        // name still follows it.
        let timestamp_parts = if parts.len() >= 6 && splits_iso_date(&parts[2..5]) {
            3
        } else {
            1
        };
        let sender = parts[0].trim();
        let inbox = parts[1].trim();
        let timestamp = parts[2..2 + timestamp_parts].join("-");
        let original = parts[2 + timestamp_parts..].join("-");

        if sender.is_empty() || inbox.is_empty() || timestamp.is_empty() || original.is_empty() {
            return BlobNameParse::rejected(ParsedBlobName::fallback(), NameRejection::BadFormat);
        }

        let company = if self.company_from_sender_domain {
            sender_domain(sender)
        } else {
            inbox.to_string()
        };

        BlobNameParse::valid(ParsedBlobName {
            sender_email: sender.to_string(),
            inbox_or_company: company,
            received_timestamp: timestamp,
            extension: extension_of(&original),
            original_file_name: original,
        })
    }

    fn parse_parenthesized(&self, base: &str) -> BlobNameParse {
        let Some(captures) = PARENTHESIZED.captures(base) else {
            return BlobNameParse::rejected(ParsedBlobName::fallback(), NameRejection::BadFormat);
        };

        let timestamp = captures["timestamp"].trim().trim_end_matches(&['_', '-'][..]).trim();
        let sender = captures["sender"].trim();
        let original = captures["file"].trim().trim_start_matches(&['_', '-'][..]).trim();

        if timestamp.is_empty() || sender.is_empty() || original.is_empty() {
            return BlobNameParse::rejected(ParsedBlobName::fallback(), NameRejection::BadFormat);
        }

        let name = ParsedBlobName {
            sender_email: sender.to_string(),
            inbox_or_company: sender_domain(sender),
            received_timestamp: timestamp.to_string(),
            original_file_name: original.to_string(),
            extension: extension_of(original),
        };

        if name.extension.is_empty() || !self.policy.allows_extension(&name.extension) {
            return BlobNameParse::rejected(name, NameRejection::UnsupportedType);
        }

        BlobNameParse::valid(name)
    }
}

/// Last path segment of a blob name.
pub fn base_name(blob_name: &str) -> &str {
    blob_name.rsplit('/').next().unwrap_or(blob_name)
}

/// Lower-cased domain of an email address, or [`UNKNOWN`].
pub fn sender_domain(sender: &str) -> String {
    sender
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_lowercase())
        .filter(|domain| !domain.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn splits_iso_date(parts: &[&str]) -> bool {
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    parts.len() == 3
        && parts[0].len() == 4
        && digits(parts[0])
        && parts[1].len() == 2
        && digits(parts[1])
        && parts[2].len() >= 2
        && parts[2].bytes().take(2).all(|b| b.is_ascii_digit())
}
