//! Admission Gate
//!
//! Runs each blob-created event through `Received -> TypeChecked ->
//! {Admitted | Quarantined}`. The decision itself is pure
//! ([`AdmissionGate::evaluate`]); [`AdmissionGate::process`] then performs
//! the side effects: quarantine on rejection, classification on admission.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use intake_core::IntakeConfig;

use crate::blob_name::{base_name, BlobNameParser, ParsedBlobName};
use crate::classification::{Classification, DocumentClassifier};
use crate::formats::FormatPolicy;
use crate::quarantine::{Quarantine, QuarantineReceipt, RejectionReason};
use crate::resolver::{decide, TypeDecision};
use crate::sniffer::Sniffer;
use crate::storage::BlobStore;
use crate::Result;

/// A blob-created event.
#[derive(Debug, Clone)]
pub struct IncomingBlob {
    /// Correlates log lines and quarantine tags for one event
    pub event_id: Uuid,
    pub container: String,
    pub name: String,
    pub content: Vec<u8>,
    /// Content type declared by the uploader, if any
    pub content_type: Option<String>,
}

impl IncomingBlob {
    pub fn new(container: impl Into<String>, name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            container: container.into(),
            name: name.into(),
            content,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read an existing blob from a store as an event.
    pub async fn load(store: &dyn BlobStore, container: &str, name: &str) -> Result<Self> {
        let stored = store.get(container, name).await?;
        Ok(Self {
            event_id: Uuid::new_v4(),
            container: container.to_string(),
            name: name.to_string(),
            content: stored.content,
            content_type: stored.content_type,
        })
    }

    /// `container/name`
    pub fn location(&self) -> String {
        format!("{}/{}", self.container, self.name)
    }
}

/// Gate states for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Received,
    TypeChecked,
    Admitted,
    Quarantined,
}

/// Pure admission decision, before any side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Admit {
        identity: ParsedBlobName,
        decision: TypeDecision,
    },
    Reject {
        identity: ParsedBlobName,
        reason: RejectionReason,
        /// Set when the type check ran
        decision: Option<TypeDecision>,
    },
}

impl GateDecision {
    pub fn state(&self) -> GateState {
        match self {
            Self::Admit { .. } => GateState::Admitted,
            Self::Reject { .. } => GateState::Quarantined,
        }
    }
}

/// What the classification collaborator made of an admitted file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClassificationOutcome {
    Classified(Classification),
    Failed { error: String },
    /// No classifier configured
    Skipped,
}

/// A file that passed the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmittedDocument {
    pub event_id: Uuid,
    pub source: String,
    pub identity: ParsedBlobName,
    pub decision: TypeDecision,
    /// Original file stem with the decided extension
    pub canonical_file_name: String,
    pub classification: ClassificationOutcome,
}

/// Terminal state of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdmissionOutcome {
    Admitted(AdmittedDocument),
    Quarantined(QuarantineReceipt),
}

impl AdmissionOutcome {
    pub fn state(&self) -> GateState {
        match self {
            Self::Admitted(_) => GateState::Admitted,
            Self::Quarantined(_) => GateState::Quarantined,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

/// File-type admission gate.
///
/// Holds only immutable configuration and shared collaborator handles, so one
/// instance can serve any number of concurrent events.
pub struct AdmissionGate {
    policy: Arc<FormatPolicy>,
    parser: BlobNameParser,
    sniffer: Sniffer,
    quarantine: Quarantine,
    classifier: Option<Arc<dyn DocumentClassifier>>,
}

impl AdmissionGate {
    pub fn new(policy: Arc<FormatPolicy>, parser: BlobNameParser, quarantine: Quarantine) -> Self {
        Self {
            sniffer: policy.sniffer(),
            policy,
            parser,
            quarantine,
            classifier: None,
        }
    }

    /// Build from configuration over the given store.
    pub fn from_config(config: &IntakeConfig, store: Arc<dyn BlobStore>) -> Self {
        let policy = Arc::new(FormatPolicy::from_config(&config.admission));
        let parser = BlobNameParser::from_config(&config.admission, policy.clone());
        let quarantine = Quarantine::new(store, config.storage.quarantine_container.clone());
        Self::new(policy, parser, quarantine)
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn DocumentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn policy(&self) -> &FormatPolicy {
        &self.policy
    }

    /// Decide admission without touching storage or the classifier.
    pub fn evaluate(&self, blob: &IncomingBlob) -> GateDecision {
        let parse = self.parser.parse(&blob.name);
        if let Some(rejection) = parse.rejection {
            debug!(
                event_id = %blob.event_id,
                blob = %blob.name,
                grammar = %self.parser.grammar(),
                rejection = ?rejection,
                "Blob name rejected"
            );
            return GateDecision::Reject {
                identity: parse.name,
                reason: rejection.reason(),
                decision: None,
            };
        }

        let sniffed = self.sniffer.sniff(&blob.content);
        let decision = decide(
            &sniffed,
            &parse.name.extension,
            blob.content_type.as_deref(),
            &self.policy,
        );

        debug!(
            event_id = %blob.event_id,
            state = ?GateState::TypeChecked,
            sniffed = %sniffed.mime,
            confidence = ?sniffed.confidence,
            source = ?decision.source,
            mime_type = %decision.mime_type,
            "Type checked"
        );

        if decision.is_unknown() {
            return GateDecision::Reject {
                identity: parse.name,
                reason: RejectionReason::UnsupportedOrUnknownType,
                decision: Some(decision),
            };
        }

        GateDecision::Admit {
            identity: parse.name,
            decision,
        }
    }

    /// Run one event to a terminal state.
    ///
    /// Only a failed quarantine write is an error; everything else ends in
    /// an [`AdmissionOutcome`].
    pub async fn process(&self, blob: IncomingBlob) -> Result<AdmissionOutcome> {
        debug!(
            event_id = %blob.event_id,
            state = ?GateState::Received,
            blob = %blob.location(),
            size = blob.content.len(),
            "Event received"
        );

        match self.evaluate(&blob) {
            GateDecision::Reject {
                identity, reason, ..
            } => {
                let receipt = self.quarantine.relocate(&blob, &identity, reason).await?;
                Ok(AdmissionOutcome::Quarantined(receipt))
            }
            GateDecision::Admit { identity, decision } => {
                let canonical_file_name = canonical_file_name(&identity, &decision);
                let classification = self.classify(&blob, &canonical_file_name).await;

                info!(
                    event_id = %blob.event_id,
                    blob = %blob.location(),
                    sender = %identity.sender_email,
                    mime_type = %decision.mime_type,
                    source = ?decision.source,
                    "File admitted"
                );

                Ok(AdmissionOutcome::Admitted(AdmittedDocument {
                    event_id: blob.event_id,
                    source: blob.location(),
                    identity,
                    decision,
                    canonical_file_name,
                    classification,
                }))
            }
        }
    }

    /// Load a stored blob and run it through the gate.
    pub async fn process_stored(
        &self,
        store: &dyn BlobStore,
        container: &str,
        name: &str,
    ) -> Result<AdmissionOutcome> {
        let blob = IncomingBlob::load(store, container, name).await?;
        self.process(blob).await
    }

    async fn classify(&self, blob: &IncomingBlob, file_name: &str) -> ClassificationOutcome {
        let Some(classifier) = &self.classifier else {
            return ClassificationOutcome::Skipped;
        };

        match classifier.classify(&blob.content, file_name).await {
            Ok(classification) => ClassificationOutcome::Classified(classification),
            Err(e) => {
                warn!(
                    event_id = %blob.event_id,
                    classifier = classifier.name(),
                    error = %e,
                    "Classification failed for admitted file"
                );
                ClassificationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Original stem with the decided extension.
///
/// Magic and content-type decisions carry the canonical extension
/// (`scan.JPEG` -> `scan.jpg`); an extension decision keeps the name's own
/// normalized extension (`fax.TIF` -> `fax.tif`).
pub fn canonical_file_name(identity: &ParsedBlobName, decision: &TypeDecision) -> String {
    let original = base_name(&identity.original_file_name);
    let stem = match original.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => original,
    };
    let stem = if stem.trim().is_empty() { "document" } else { stem };
    format!("{}{}", stem, decision.file_extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::{ClassificationError, ClassificationResult};
    use crate::resolver::DecisionSource;
    use crate::storage::{BlobMetadata, InMemoryBlobStore};
    use async_trait::async_trait;
    use intake_core::{AdmissionConfig, BlobNameGrammar};

    struct FixedClassifier(std::result::Result<&'static str, &'static str>);

    #[async_trait]
    impl DocumentClassifier for FixedClassifier {
        async fn classify(
            &self,
            _content: &[u8],
            file_name: &str,
        ) -> ClassificationResult<Classification> {
            match self.0 {
                Ok(doc_type) => Ok(Classification::new(format!("{}:{}", doc_type, file_name), 0.9)),
                Err(message) => Err(ClassificationError::Failed(message.to_string())),
            }
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn pdf() -> Vec<u8> {
        b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n1 0 obj".to_vec()
    }

    fn gate(store: Arc<InMemoryBlobStore>) -> AdmissionGate {
        AdmissionGate::from_config(&IntakeConfig::default(), store)
    }

    #[test]
    fn test_evaluate_admits_pdf() {
        let gate = gate(Arc::new(InMemoryBlobStore::new()));
        let blob = IncomingBlob::new(
            "attachments",
            "alice@co.com-acme-2024-05-01T00:00:00Z-invoice.pdf",
            pdf(),
        );

        match gate.evaluate(&blob) {
            GateDecision::Admit { identity, decision } => {
                assert_eq!(identity.sender_email, "alice@co.com");
                assert_eq!(decision.source, DecisionSource::Magic);
            }
            other => panic!("expected admit, got {:?}", other),
        }
    }

    #[test]
    fn test_evaluate_rejects_name_before_sniffing() {
        let gate = gate(Arc::new(InMemoryBlobStore::new()));
        let blob = IncomingBlob::new("attachments", "invoice.pdf", pdf());

        let decision = gate.evaluate(&blob);
        assert_eq!(decision.state(), GateState::Quarantined);
        assert!(matches!(
            decision,
            GateDecision::Reject {
                reason: RejectionReason::InvalidFilename,
                decision: None,
                ..
            }
        ));
    }

    #[test]
    fn test_evaluate_rejects_unknown_type() {
        let gate = gate(Arc::new(InMemoryBlobStore::new()));
        let blob = IncomingBlob::new("attachments", "a@b.com-acme-1714521600-data.xyz", vec![]);

        match gate.evaluate(&blob) {
            GateDecision::Reject { reason, decision, .. } => {
                assert_eq!(reason, RejectionReason::UnsupportedOrUnknownType);
                assert_eq!(decision, Some(TypeDecision::unknown()));
            }
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_unsupported_extension_skips_sniffing() {
        let config = IntakeConfig {
            admission: AdmissionConfig::new().with_grammar(BlobNameGrammar::Parenthesized),
            ..Default::default()
        };
        let gate = AdmissionGate::from_config(&config, Arc::new(InMemoryBlobStore::new()));
        // Content is a real PDF, but the name's extension decides first.
        let blob = IncomingBlob::new("attachments", "20240501(alice@co.com)report.docx", pdf());

        assert!(matches!(
            gate.evaluate(&blob),
            GateDecision::Reject {
                reason: RejectionReason::UnsupportedOrUnknownType,
                decision: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_process_admits_and_classifies() {
        let store = Arc::new(InMemoryBlobStore::new());
        let gate = gate(store.clone()).with_classifier(Arc::new(FixedClassifier(Ok("invoice"))));
        let blob = IncomingBlob::new("attachments", "alice@co.com-acme-20240501T000000-Scan.JPEG", {
            let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
            jpeg.resize(64, 0);
            jpeg
        });

        let outcome = gate.process(blob).await.unwrap();

        let AdmissionOutcome::Admitted(document) = outcome else {
            panic!("expected admission");
        };
        assert_eq!(document.canonical_file_name, "Scan.jpg");
        assert_eq!(document.decision.mime_type, "image/jpeg");
        assert_eq!(
            document.classification,
            ClassificationOutcome::Classified(Classification::new("invoice:Scan.jpg", 0.9))
        );
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_process_records_classification_failure() {
        let gate = gate(Arc::new(InMemoryBlobStore::new()))
            .with_classifier(Arc::new(FixedClassifier(Err("service unavailable"))));
        let blob = IncomingBlob::new("attachments", "a@b.com-acme-1714521600-x.pdf", pdf());

        let outcome = gate.process(blob).await.unwrap();

        assert!(outcome.is_admitted());
        let AdmissionOutcome::Admitted(document) = outcome else {
            unreachable!()
        };
        assert!(matches!(document.classification, ClassificationOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_process_without_classifier_skips() {
        let gate = gate(Arc::new(InMemoryBlobStore::new()));
        let blob = IncomingBlob::new("attachments", "a@b.com-acme-1714521600-x.pdf", pdf());

        let AdmissionOutcome::Admitted(document) = gate.process(blob).await.unwrap() else {
            panic!("expected admission");
        };
        assert_eq!(document.classification, ClassificationOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_process_stored_quarantines() {
        let store = Arc::new(InMemoryBlobStore::new());
        store
            .put(
                "attachments",
                "bad-name.pdf",
                &pdf(),
                Some("application/pdf"),
                &BlobMetadata::new(),
            )
            .await
            .unwrap();
        let gate = gate(store.clone());

        let outcome = gate
            .process_stored(store.as_ref(), "attachments", "bad-name.pdf")
            .await
            .unwrap();

        let AdmissionOutcome::Quarantined(receipt) = outcome else {
            panic!("expected quarantine");
        };
        assert_eq!(receipt.reason, RejectionReason::InvalidFilename);
        assert!(receipt.path.starts_with("unknown/"));
        assert!(receipt.path.ends_with("/bad-name.pdf"));
        assert!(receipt.source_deleted);
        assert!(!store.contains("attachments", "bad-name.pdf").await);
    }

    #[test]
    fn test_canonical_file_name() {
        let mut identity = ParsedBlobName::fallback();
        let from_name = TypeDecision {
            file_extension: ".tif".to_string(),
            mime_type: "image/tiff".to_string(),
            source: DecisionSource::Extension,
        };
        identity.original_file_name = "fax page.TIF".to_string();
        assert_eq!(canonical_file_name(&identity, &from_name), "fax page.tif");

        let decision = TypeDecision {
            file_extension: ".tiff".to_string(),
            mime_type: "image/tiff".to_string(),
            source: DecisionSource::Magic,
        };
        assert_eq!(canonical_file_name(&identity, &decision), "fax page.tiff");

        identity.original_file_name = "noext".to_string();
        assert_eq!(canonical_file_name(&identity, &decision), "noext.tiff");

        identity.original_file_name = ".tif".to_string();
        assert_eq!(canonical_file_name(&identity, &decision), "document.tiff");
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = AdmissionOutcome::Quarantined(QuarantineReceipt {
            container: "quarantine".to_string(),
            path: "acme/2024-05-01/a.exe".to_string(),
            reason: RejectionReason::UnsupportedOrUnknownType,
            source_deleted: true,
        });

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "quarantined");
        assert_eq!(json["reason"], "unsupported_or_unknown_type");
    }
}
