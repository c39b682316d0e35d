//! Document Classification
//!
//! Admitted files are handed to an external classification service. The
//! service works asynchronously: a document is submitted, then the returned
//! operation is polled until it settles. [`PollingClassifier`] bounds that
//! loop with a fixed interval and attempt count so callers only see
//! [`DocumentClassifier::classify`].

use async_trait::async_trait;
use intake_core::ClassificationConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Classification errors
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("Submission failed: {0}")]
    Submit(String),

    #[error("Classification failed: {0}")]
    Failed(String),

    #[error("Classification still running after {attempts} polls")]
    TimedOut { attempts: u32 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

pub type ClassificationResult<T> = std::result::Result<T, ClassificationError>;

/// Document type assigned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub document_type: String,
    pub confidence: f32,
}

impl Classification {
    pub fn new(document_type: impl Into<String>, confidence: f32) -> Self {
        Self {
            document_type: document_type.into(),
            confidence,
        }
    }
}

/// Opaque reference to a submitted classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

/// State of a submitted classification.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Running,
    Succeeded(Classification),
    Failed(String),
}

/// Anything that can classify a document in one call.
#[async_trait]
pub trait DocumentClassifier: Send + Sync {
    async fn classify(
        &self,
        content: &[u8],
        file_name: &str,
    ) -> ClassificationResult<Classification>;

    fn name(&self) -> &'static str;
}

/// Submit/poll capability of an asynchronous classification service.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn submit(
        &self,
        content: &[u8],
        file_name: &str,
    ) -> ClassificationResult<OperationHandle>;

    async fn poll(&self, handle: &OperationHandle) -> ClassificationResult<OperationStatus>;
}

/// Fixed-interval polling bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollingPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &ClassificationConfig) -> Self {
        Self::new(config.poll_interval(), config.max_poll_attempts)
    }
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 30)
    }
}

/// Classifier that drives a [`ClassificationService`] to completion.
pub struct PollingClassifier<S> {
    service: S,
    policy: PollingPolicy,
}

impl<S: ClassificationService> PollingClassifier<S> {
    pub fn new(service: S, policy: PollingPolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> PollingPolicy {
        self.policy
    }
}

#[async_trait]
impl<S: ClassificationService> DocumentClassifier for PollingClassifier<S> {
    async fn classify(
        &self,
        content: &[u8],
        file_name: &str,
    ) -> ClassificationResult<Classification> {
        let handle = self.service.submit(content, file_name).await?;
        debug!(operation = %handle.0, file_name = %file_name, "Classification submitted");

        for attempt in 1..=self.policy.max_attempts {
            tokio::time::sleep(self.policy.interval).await;

            match self.service.poll(&handle).await? {
                OperationStatus::Running => {
                    debug!(operation = %handle.0, attempt, "Classification still running");
                }
                OperationStatus::Succeeded(classification) => {
                    debug!(
                        operation = %handle.0,
                        attempt,
                        document_type = %classification.document_type,
                        "Classification finished"
                    );
                    return Ok(classification);
                }
                OperationStatus::Failed(message) => {
                    return Err(ClassificationError::Failed(message));
                }
            }
        }

        Err(ClassificationError::TimedOut {
            attempts: self.policy.max_attempts,
        })
    }

    fn name(&self) -> &'static str {
        "polling"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    documents: Vec<AnalyzedDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzedDocument {
    doc_type: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    message: String,
}

/// Header carrying the operation URL on submission.
const OPERATION_LOCATION: &str = "Operation-Location";
const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// REST client for a form-understanding style classification service.
///
/// Submission POSTs the raw document to
/// `{endpoint}/documentClassifiers/{classifier}:analyze` and reads the
/// operation URL from the `Operation-Location` header; polling GETs that URL.
pub struct HttpClassificationService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    classifier_id: String,
    api_version: String,
}

impl HttpClassificationService {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let defaults = ClassificationConfig::default();
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            classifier_id: defaults.classifier_id,
            api_version: defaults.api_version,
        }
    }

    /// Returns `None` when no endpoint is configured.
    pub fn from_config(config: &ClassificationConfig) -> Option<Self> {
        if !config.is_enabled() {
            return None;
        }
        let endpoint = config.endpoint.clone()?;
        Some(
            Self::new(endpoint, config.api_key.clone())
                .with_classifier_id(config.classifier_id.clone())
                .with_api_version(config.api_version.clone()),
        )
    }

    pub fn with_classifier_id(mut self, classifier_id: impl Into<String>) -> Self {
        self.classifier_id = classifier_id.into();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentClassifiers/{}:analyze?api-version={}",
            self.endpoint, self.classifier_id, self.api_version
        )
    }
}

#[async_trait]
impl ClassificationService for HttpClassificationService {
    async fn submit(
        &self,
        content: &[u8],
        file_name: &str,
    ) -> ClassificationResult<OperationHandle> {
        let response = self
            .client
            .post(self.analyze_url())
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassificationError::Submit(format!(
                "{} for {}: {}",
                status, file_name, body
            )));
        }

        let location = response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ClassificationError::InvalidResponse(format!(
                    "missing {} header",
                    OPERATION_LOCATION
                ))
            })?;

        Ok(OperationHandle(location.to_string()))
    }

    async fn poll(&self, handle: &OperationHandle) -> ClassificationResult<OperationStatus> {
        let response = self
            .client
            .get(&handle.0)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?
            .error_for_status()?;

        let operation: OperationResponse = response.json().await?;

        match operation.status.to_ascii_lowercase().as_str() {
            "notstarted" | "running" => Ok(OperationStatus::Running),
            "succeeded" => {
                let best = operation
                    .analyze_result
                    .map(|r| r.documents)
                    .unwrap_or_default()
                    .into_iter()
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
                    .ok_or_else(|| {
                        ClassificationError::InvalidResponse(
                            "succeeded without any documents".to_string(),
                        )
                    })?;
                Ok(OperationStatus::Succeeded(Classification::new(
                    best.doc_type,
                    best.confidence,
                )))
            }
            "failed" | "canceled" => Ok(OperationStatus::Failed(
                operation
                    .error
                    .map(|e| e.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| format!("operation {}", operation.status)),
            )),
            other => Err(ClassificationError::InvalidResponse(format!(
                "unknown operation status: {}",
                other
            ))),
        }
    }
}
