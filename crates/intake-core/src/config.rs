use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Environment variable prefix, e.g. `INTAKE__STORAGE__ROOT`.
pub const ENV_PREFIX: &str = "INTAKE";

/// Main intake configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntakeConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl IntakeConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_env(ENV_PREFIX)
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(environment(prefix))
            .build()?;

        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(environment(ENV_PREFIX))
            .build()?;

        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject values the gate cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.source_container.trim().is_empty() {
            return Err(ConfigError::invalid(
                "storage.source_container",
                "must not be empty",
            ));
        }
        if self.storage.quarantine_container.trim().is_empty() {
            return Err(ConfigError::invalid(
                "storage.quarantine_container",
                "must not be empty",
            ));
        }
        if self.storage.source_container == self.storage.quarantine_container {
            return Err(ConfigError::invalid(
                "storage.quarantine_container",
                "must differ from storage.source_container",
            ));
        }
        if self.classification.max_poll_attempts == 0 {
            return Err(ConfigError::invalid(
                "classification.max_poll_attempts",
                "must be at least 1",
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::invalid(
                "worker.concurrency",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn environment(prefix: &str) -> Environment {
    Environment::with_prefix(prefix)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("admission.allowed_extensions")
        .with_list_parse_key("admission.allowed_mime_types")
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage root; a directory for the local store
    #[serde(default = "default_storage_root")]
    pub root: String,
    #[serde(default = "default_source_container")]
    pub source_container: String,
    #[serde(default = "default_quarantine_container")]
    pub quarantine_container: String,
}

impl StorageConfig {
    pub fn new(root: String) -> Self {
        Self {
            root,
            source_container: default_source_container(),
            quarantine_container: default_quarantine_container(),
        }
    }

    pub fn with_containers(mut self, source: String, quarantine: String) -> Self {
        self.source_container = source;
        self.quarantine_container = quarantine;
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(default_storage_root())
    }
}

fn default_storage_root() -> String {
    "./blob-data".to_string()
}

fn default_source_container() -> String {
    "attachments".to_string()
}

fn default_quarantine_container() -> String {
    "quarantine".to_string()
}

/// Naming convention used for incoming blob names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobNameGrammar {
    /// `sender-inbox-timestamp-original.ext`
    #[default]
    Hyphen,
    /// `timestamp(sender)original.ext`
    Parenthesized,
}

impl BlobNameGrammar {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hyphen => "hyphen",
            Self::Parenthesized => "parenthesized",
        }
    }
}

impl std::fmt::Display for BlobNameGrammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission (file-type gate) configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdmissionConfig {
    /// Allowed extensions; empty means the built-in base table
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    /// Allowed MIME types; empty means the built-in base table
    #[serde(default)]
    pub allowed_mime_types: Vec<String>,
    /// Admit HEIC/HEIF in addition to the base formats
    #[serde(default)]
    pub extended_image_formats: bool,
    #[serde(default)]
    pub blob_name_grammar: BlobNameGrammar,
    /// Derive the company from the sender's email domain
    #[serde(default)]
    pub company_from_sender_domain: bool,
}

impl AdmissionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grammar(mut self, grammar: BlobNameGrammar) -> Self {
        self.blob_name_grammar = grammar;
        self
    }

    pub fn with_extended_image_formats(mut self, enabled: bool) -> Self {
        self.extended_image_formats = enabled;
        self
    }

    pub fn with_allowed_extensions(mut self, extensions: Vec<String>) -> Self {
        self.allowed_extensions = extensions;
        self
    }

    pub fn with_allowed_mime_types(mut self, mime_types: Vec<String>) -> Self {
        self.allowed_mime_types = mime_types;
        self
    }

    pub fn with_company_from_sender_domain(mut self, enabled: bool) -> Self {
        self.company_from_sender_domain = enabled;
        self
    }
}

/// Classification collaborator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationConfig {
    /// Service base URL; classification is skipped when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_classifier_id")]
    pub classifier_id: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl ClassificationConfig {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            endpoint: Some(endpoint),
            api_key,
            ..Default::default()
        }
    }

    pub fn with_classifier_id(mut self, classifier_id: String) -> Self {
        self.classifier_id = classifier_id;
        self
    }

    pub fn with_polling(mut self, interval_ms: u64, max_attempts: u32) -> Self {
        self.poll_interval_ms = interval_ms;
        self.max_poll_attempts = max_attempts;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint
            .as_deref()
            .map(|e| !e.trim().is_empty())
            .unwrap_or(false)
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: String::new(),
            classifier_id: default_classifier_id(),
            api_version: default_api_version(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

fn default_classifier_id() -> String {
    "document-types".to_string()
}

fn default_api_version() -> String {
    "2024-11-30".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_attempts() -> u32 {
    30
}

/// Worker host configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Events processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    num_cpus::get().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = IntakeConfig::default();

        assert_eq!(config.storage.source_container, "attachments");
        assert_eq!(config.storage.quarantine_container, "quarantine");
        assert_eq!(config.admission.blob_name_grammar, BlobNameGrammar::Hyphen);
        assert!(!config.admission.extended_image_formats);
        assert!(!config.classification.is_enabled());
        assert_eq!(config.classification.max_poll_attempts, 30);
        assert!(config.worker.concurrency > 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_classification_config_creation() {
        let config = ClassificationConfig::new(
            "https://ocr.example.com".to_string(),
            "key-123".to_string(),
        )
        .with_classifier_id("invoices-v2".to_string())
        .with_polling(250, 4);

        assert!(config.is_enabled());
        assert_eq!(config.classifier_id, "invoices-v2");
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.max_poll_attempts, 4);
    }

    #[test]
    fn test_blank_endpoint_disables_classification() {
        let config = ClassificationConfig::new("  ".to_string(), String::new());
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_admission_config_builder() {
        let config = AdmissionConfig::new()
            .with_grammar(BlobNameGrammar::Parenthesized)
            .with_extended_image_formats(true)
            .with_allowed_extensions(vec![".pdf".to_string()])
            .with_company_from_sender_domain(true);

        assert_eq!(config.blob_name_grammar, BlobNameGrammar::Parenthesized);
        assert!(config.extended_image_formats);
        assert_eq!(config.allowed_extensions, vec![".pdf".to_string()]);
        assert!(config.company_from_sender_domain);
    }

    #[test]
    fn test_validate_rejects_same_containers() {
        let mut config = IntakeConfig::default();
        config.storage = StorageConfig::new("/tmp/blobs".to_string())
            .with_containers("inbox".to_string(), "inbox".to_string());

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.quarantine_container"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = IntakeConfig::default();
        config.worker = config.worker.with_concurrency(0);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[storage]
root = "/srv/blobs"
source_container = "mail-attachments"

[admission]
blob_name_grammar = "parenthesized"
extended_image_formats = true
allowed_extensions = [".pdf", ".png"]

[classification]
endpoint = "https://ocr.example.com"
max_poll_attempts = 5
"#
        )
        .unwrap();

        let config = IntakeConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.storage.root, "/srv/blobs");
        assert_eq!(config.storage.source_container, "mail-attachments");
        assert_eq!(config.storage.quarantine_container, "quarantine");
        assert_eq!(config.admission.blob_name_grammar, BlobNameGrammar::Parenthesized);
        assert!(config.admission.extended_image_formats);
        assert_eq!(config.admission.allowed_extensions, vec![".pdf", ".png"]);
        assert!(config.classification.is_enabled());
        assert_eq!(config.classification.max_poll_attempts, 5);
    }

    #[test]
    fn test_load_from_env() {
        std::env::set_var("INTAKETEST__STORAGE__ROOT", "/data/blobs");
        std::env::set_var("INTAKETEST__ADMISSION__BLOB_NAME_GRAMMAR", "parenthesized");
        std::env::set_var("INTAKETEST__ADMISSION__ALLOWED_MIME_TYPES", "application/pdf,image/png");

        let config = IntakeConfig::load_from_env("INTAKETEST").unwrap();

        assert_eq!(config.storage.root, "/data/blobs");
        assert_eq!(config.admission.blob_name_grammar, BlobNameGrammar::Parenthesized);
        assert_eq!(
            config.admission.allowed_mime_types,
            vec!["application/pdf", "image/png"]
        );
    }
}
