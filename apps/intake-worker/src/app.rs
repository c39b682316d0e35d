//! Worker state and the scan loop

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use intake_admission::{
    AdmissionGate, AdmissionOutcome, BlobStore, FsBlobStore, HttpClassificationService,
    PollingClassifier, PollingPolicy,
};
use intake_core::IntakeConfig;

use crate::cli::Args;

/// Counts for one pass over the source container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub admitted: usize,
    pub quarantined: usize,
    pub failed: usize,
}

impl ScanSummary {
    pub fn total(&self) -> usize {
        self.admitted + self.quarantined + self.failed
    }
}

/// Main application
pub struct App {
    args: Args,
    config: IntakeConfig,
    store: Arc<dyn BlobStore>,
    gate: AdmissionGate,
}

impl App {
    /// Load configuration and wire the gate to its collaborators.
    pub async fn build(args: Args) -> Result<Self> {
        args.validate().context("Invalid command line arguments")?;

        let mut config = match &args.config {
            Some(path) => IntakeConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => IntakeConfig::load().context("Failed to load config from environment")?,
        };
        if let Some(concurrency) = args.concurrency {
            config.worker = config.worker.with_concurrency(concurrency);
        }
        config.validate().context("Invalid configuration")?;

        let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.storage.root));
        let mut gate = AdmissionGate::from_config(&config, store.clone());

        match HttpClassificationService::from_config(&config.classification) {
            Some(service) => {
                let policy = PollingPolicy::from_config(&config.classification);
                info!(
                    classifier_id = %config.classification.classifier_id,
                    max_attempts = policy.max_attempts,
                    "Classification enabled"
                );
                gate = gate.with_classifier(Arc::new(PollingClassifier::new(service, policy)));
            }
            None => info!("No classification endpoint configured; skipping classification"),
        }

        info!(
            root = %config.storage.root,
            source = %config.storage.source_container,
            quarantine = %config.storage.quarantine_container,
            grammar = %config.admission.blob_name_grammar,
            concurrency = config.worker.concurrency,
            "Worker configured"
        );

        Ok(Self {
            args,
            config,
            store,
            gate,
        })
    }

    /// Scan once, or until Ctrl-C in watch mode.
    pub async fn run(self) -> Result<()> {
        let mut seen = HashSet::new();

        if !self.args.watch {
            let summary = self.scan(&mut seen).await?;
            if summary.failed > 0 {
                anyhow::bail!("{} of {} events failed", summary.failed, summary.total());
            }
            return Ok(());
        }

        let interval = Duration::from_secs(self.args.scan_interval_secs);
        loop {
            if let Err(e) = self.scan(&mut seen).await {
                error!("Scan failed: {:#}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    /// Run every not-yet-seen blob in the source container through the gate.
    ///
    /// Admitted blobs stay in the source container, so their names go into
    /// `seen` to keep later scans from admitting them twice. Names no longer
    /// listed are dropped from `seen`. Failed events are retried on the next
    /// scan.
    pub async fn scan(&self, seen: &mut HashSet<String>) -> Result<ScanSummary> {
        let source = self.config.storage.source_container.as_str();
        let listed: HashSet<String> = self
            .store
            .list(source)
            .await
            .with_context(|| format!("Failed to list container {}", source))?
            .into_iter()
            .collect();

        // Forget blobs that have left the container.
        seen.retain(|name| listed.contains(name));

        let mut names: Vec<String> = listed
            .into_iter()
            .filter(|name| !seen.contains(name))
            .collect();
        names.sort();

        if names.is_empty() {
            return Ok(ScanSummary::default());
        }

        let gate = &self.gate;
        let store = self.store.as_ref();
        let results: Vec<_> = stream::iter(names)
            .map(|name| async move {
                let outcome = gate.process_stored(store, source, &name).await;
                (name, outcome)
            })
            .buffer_unordered(self.config.worker.concurrency)
            .collect()
            .await;

        let mut summary = ScanSummary::default();
        for (name, outcome) in results {
            match outcome {
                Ok(outcome) => {
                    match &outcome {
                        AdmissionOutcome::Admitted(_) => {
                            summary.admitted += 1;
                            seen.insert(name);
                        }
                        AdmissionOutcome::Quarantined(receipt) => {
                            summary.quarantined += 1;
                            if !receipt.source_deleted {
                                seen.insert(name);
                            }
                        }
                    }
                    if self.args.report {
                        println!("{}", serde_json::to_string(&outcome)?);
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(blob = %name, error = %e, "Event failed");
                }
            }
        }

        info!(
            admitted = summary.admitted,
            quarantined = summary.quarantined,
            failed = summary.failed,
            "Scan complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use intake_admission::BlobMetadata;

    async fn app_over(dir: &std::path::Path) -> App {
        let config_path = dir.join("intake.toml");
        std::fs::write(
            &config_path,
            format!(
                "[storage]\nroot = \"{}\"\n\n[worker]\nconcurrency = 2\n",
                dir.join("blobs").display()
            ),
        )
        .unwrap();

        let args = Args::parse_from([
            "intake-worker",
            "--config",
            config_path.to_str().unwrap(),
        ]);
        App::build(args).await.unwrap()
    }

    #[tokio::test]
    async fn test_scan_admits_and_quarantines() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_over(dir.path()).await;

        let metadata = BlobMetadata::new();
        app.store
            .put(
                "attachments",
                "alice@co.com-acme-2024-05-01T00:00:00Z-invoice.pdf",
                b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n",
                None,
                &metadata,
            )
            .await
            .unwrap();
        app.store
            .put(
                "attachments",
                "stray-upload.pdf",
                b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n",
                None,
                &metadata,
            )
            .await
            .unwrap();

        let mut seen = HashSet::new();
        let summary = app.scan(&mut seen).await.unwrap();

        assert_eq!(
            summary,
            ScanSummary {
                admitted: 1,
                quarantined: 1,
                failed: 0
            }
        );
        assert!(seen.contains("alice@co.com-acme-2024-05-01T00:00:00Z-invoice.pdf"));
        assert_eq!(app.store.list("quarantine").await.unwrap().len(), 1);

        // Admitted blobs are not processed again.
        let again = app.scan(&mut seen).await.unwrap();
        assert_eq!(again.total(), 0);
    }

    #[tokio::test]
    async fn test_scan_forgets_blobs_removed_from_source() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_over(dir.path()).await;
        let names = [
            "alice@co.com-acme-20240501T101500-a.pdf",
            "alice@co.com-acme-20240501T101500-b.pdf",
        ];
        for name in names {
            app.store
                .put(
                    "attachments",
                    name,
                    b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n",
                    None,
                    &BlobMetadata::new(),
                )
                .await
                .unwrap();
        }

        let mut seen = HashSet::new();
        assert_eq!(app.scan(&mut seen).await.unwrap().admitted, 2);
        assert_eq!(seen.len(), 2);

        app.store.delete("attachments", names[0]).await.unwrap();
        let summary = app.scan(&mut seen).await.unwrap();

        assert_eq!(summary.total(), 0);
        assert_eq!(seen.len(), 1);
        assert!(seen.contains(names[1]));
    }

    #[tokio::test]
    async fn test_one_shot_run_fails_when_an_event_fails() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_over(dir.path()).await;
        app.store
            .put("attachments", "stray-upload.exe", b"MZ", None, &BlobMetadata::new())
            .await
            .unwrap();
        // A file where the quarantine directory should be makes the write fail.
        std::fs::create_dir_all(dir.path().join("blobs")).unwrap();
        std::fs::write(dir.path().join("blobs").join("quarantine"), b"").unwrap();

        let err = app.run().await.unwrap_err();

        assert!(err.to_string().contains("1 of 1 events failed"));
    }

    #[tokio::test]
    async fn test_build_applies_concurrency_override() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("intake.toml");
        std::fs::write(&config_path, "[worker]\nconcurrency = 2\n").unwrap();

        let args = Args::parse_from([
            "intake-worker",
            "--config",
            config_path.to_str().unwrap(),
            "--concurrency",
            "7",
        ]);
        let app = App::build(args).await.unwrap();

        assert_eq!(app.config.worker.concurrency, 7);
    }
}
