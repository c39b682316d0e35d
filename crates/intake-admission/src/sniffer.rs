//! Magic-Byte Sniffer
//!
//! Guesses a file format from the leading bytes of its content, independent
//! of whatever name or content type the sender attached to it.

use serde::{Deserialize, Serialize};

/// Number of leading bytes inspected.
pub const SNIFF_PREFIX_LEN: usize = 12;

/// How much a sniffed format can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// Best guess for a buffer's format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SniffResult {
    /// Extension with leading dot, empty when nothing matched
    pub ext: String,
    /// MIME type, empty when nothing matched
    pub mime: String,
    pub confidence: Confidence,
}

impl SniffResult {
    pub fn unknown() -> Self {
        Self {
            ext: String::new(),
            mime: String::new(),
            confidence: Confidence::Low,
        }
    }

    fn matched(ext: &str, mime: &str, confidence: Confidence) -> Self {
        Self {
            ext: ext.to_string(),
            mime: mime.to_string(),
            confidence,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.mime.is_empty()
    }
}

struct Signature {
    ext: &'static str,
    mime: &'static str,
    prefixes: &'static [&'static [u8]],
}

// Order is the tie-break priority; new signatures go where they should win.
const SIGNATURES: &[Signature] = &[
    Signature {
        ext: ".pdf",
        mime: "application/pdf",
        prefixes: &[b"%PDF-"],
    },
    Signature {
        ext: ".jpg",
        mime: "image/jpeg",
        prefixes: &[b"\xFF\xD8"],
    },
    Signature {
        ext: ".png",
        mime: "image/png",
        prefixes: &[b"\x89PNG"],
    },
    Signature {
        ext: ".tiff",
        mime: "image/tiff",
        prefixes: &[b"II*\x00", b"MM\x00*"],
    },
    Signature {
        ext: ".bmp",
        mime: "image/bmp",
        prefixes: &[b"BM"],
    },
];

/// ISO-BMFF brands that identify HEIC/HEIF containers.
const HEIC_BRANDS: &[&[u8]] = &[b"ftypheic", b"ftypheif", b"ftypmif1", b"ftypheix"];

/// Signature-table sniffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sniffer {
    detect_heic: bool,
}

impl Sniffer {
    /// Prefer [`crate::FormatPolicy::sniffer`], which keeps the HEIC
    /// signature in step with the allow-lists.
    pub fn new(detect_heic: bool) -> Self {
        Self { detect_heic }
    }

    pub fn detects_heic(&self) -> bool {
        self.detect_heic
    }

    /// Sniff a buffer. Never fails; short or unrecognised buffers yield
    /// [`SniffResult::unknown`].
    pub fn sniff(&self, buffer: &[u8]) -> SniffResult {
        if buffer.len() < SNIFF_PREFIX_LEN {
            return SniffResult::unknown();
        }
        let prefix = &buffer[..SNIFF_PREFIX_LEN];

        for signature in SIGNATURES {
            if signature.prefixes.iter().any(|p| prefix.starts_with(p)) {
                return SniffResult::matched(signature.ext, signature.mime, Confidence::High);
            }
        }

        if self.detect_heic {
            let is_heic = HEIC_BRANDS
                .iter()
                .any(|brand| prefix.windows(brand.len()).any(|w| w == *brand));
            if is_heic {
                return SniffResult::matched(".heic", "image/heic", Confidence::Low);
            }
        }

        SniffResult::unknown()
    }
}
