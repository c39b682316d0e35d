//! Format Tables and Allow-Lists
//!
//! Static extension/MIME tables plus the [`FormatPolicy`] that decides which
//! of them a deployment admits. The policy is the single source for the
//! allowed extensions, the allowed MIME types and the sniffer's signature
//! set, so enabling extended image formats updates all three together.

use intake_core::AdmissionConfig;
use std::collections::BTreeSet;
use tracing::warn;

use crate::sniffer::Sniffer;

/// Base formats: extension and its canonical MIME type.
const BASE_FORMATS: &[(&str, &str)] = &[
    (".pdf", "application/pdf"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".tif", "image/tiff"),
    (".tiff", "image/tiff"),
    (".bmp", "image/bmp"),
];

/// Formats added by the extended image format flag.
const EXTENDED_FORMATS: &[(&str, &str)] = &[(".heic", "image/heic"), (".heif", "image/heif")];

/// MIME type to canonical extension.
const CANONICAL_EXTENSIONS: &[(&str, &str)] = &[
    ("application/pdf", ".pdf"),
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/tiff", ".tiff"),
    ("image/bmp", ".bmp"),
    ("image/heic", ".heic"),
    ("image/heif", ".heif"),
];

/// Canonical MIME type for an extension (`.jpeg` -> `image/jpeg`).
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let extension = normalize_extension(extension);
    BASE_FORMATS
        .iter()
        .chain(EXTENDED_FORMATS)
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

/// Canonical extension for a MIME type (`image/jpeg` -> `.jpg`).
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    let mime_type = normalize_content_type(mime_type);
    CANONICAL_EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == mime_type)
        .map(|(_, ext)| *ext)
}

/// Lower-case an extension and give it a leading dot. Blank input stays blank.
pub fn normalize_extension(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return String::new();
    }
    format!(".{}", trimmed.to_lowercase())
}

/// Lower-case a content type and drop any parameters (`; charset=...`).
pub fn normalize_content_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Extension of a file name, normalized; empty when there is none.
pub fn extension_of(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| normalize_extension(ext))
        .unwrap_or_default()
}

/// Allow-lists for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPolicy {
    allowed_extensions: BTreeSet<String>,
    allowed_mime_types: BTreeSet<String>,
    extended_image_formats: bool,
}

impl FormatPolicy {
    /// Base table only.
    pub fn base() -> Self {
        Self::from_table(false)
    }

    /// Base table plus the extended image formats.
    pub fn extended() -> Self {
        Self::from_table(true)
    }

    fn from_table(extended_image_formats: bool) -> Self {
        let mut policy = Self {
            allowed_extensions: BTreeSet::new(),
            allowed_mime_types: BTreeSet::new(),
            extended_image_formats: false,
        };
        policy.extend(BASE_FORMATS);
        if extended_image_formats {
            policy.enable_extended_image_formats();
        }
        policy
    }

    /// Build from configuration. Empty lists fall back to the base table.
    /// Entries outside the formats this policy can sniff are dropped with a
    /// warning, so HEIC/HEIF only survive when the extended flag is on.
    pub fn from_config(config: &AdmissionConfig) -> Self {
        let mut policy = Self::base();
        let extra: &[(&str, &str)] = if config.extended_image_formats {
            EXTENDED_FORMATS
        } else {
            &[]
        };
        let formats = || BASE_FORMATS.iter().chain(extra);

        if !config.allowed_extensions.is_empty() {
            policy.allowed_extensions = config
                .allowed_extensions
                .iter()
                .map(|e| normalize_extension(e))
                .filter(|e| {
                    let known = formats().any(|(ext, _)| *ext == e.as_str());
                    if !known {
                        warn!(
                            extension = %e,
                            extended_image_formats = config.extended_image_formats,
                            "Ignoring allowed extension outside the format table"
                        );
                    }
                    known
                })
                .collect();
        }

        if !config.allowed_mime_types.is_empty() {
            policy.allowed_mime_types = config
                .allowed_mime_types
                .iter()
                .map(|m| normalize_content_type(m))
                .filter(|m| {
                    let known = formats().any(|(_, mime)| *mime == m.as_str());
                    if !known {
                        warn!(
                            mime_type = %m,
                            extended_image_formats = config.extended_image_formats,
                            "Ignoring allowed MIME type outside the format table"
                        );
                    }
                    known
                })
                .collect();
        }

        if config.extended_image_formats {
            policy.enable_extended_image_formats();
        }

        policy
    }

    fn extend(&mut self, formats: &[(&str, &str)]) {
        for (ext, mime) in formats {
            self.allowed_extensions.insert((*ext).to_string());
            self.allowed_mime_types.insert((*mime).to_string());
        }
    }

    fn enable_extended_image_formats(&mut self) {
        self.extend(EXTENDED_FORMATS);
        self.extended_image_formats = true;
    }

    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions
            .contains(&normalize_extension(extension))
    }

    pub fn allows_mime(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .contains(&normalize_content_type(mime_type))
    }

    pub fn extended_image_formats(&self) -> bool {
        self.extended_image_formats
    }

    pub fn allowed_extensions(&self) -> impl Iterator<Item = &str> {
        self.allowed_extensions.iter().map(String::as_str)
    }

    pub fn allowed_mime_types(&self) -> impl Iterator<Item = &str> {
        self.allowed_mime_types.iter().map(String::as_str)
    }

    /// Sniffer whose signature table matches this policy.
    pub fn sniffer(&self) -> Sniffer {
        Sniffer::new(self.extended_image_formats)
    }
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self::base()
    }
}
