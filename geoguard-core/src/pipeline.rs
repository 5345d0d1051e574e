use std::{collections::HashSet, fmt, sync::Arc};

use serde::Serialize;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::api_types::{ParsedFinalize, ParsedFinalizeScan};
use crate::batch::{Batch, BatchKey, accumulator::BatchAccumulator};
use crate::cleanup::CleanupManager;
use crate::delivery::DeliveryService;
use crate::error::FinalizeError;
use crate::report::{
    builder::{ReportBuilder, ReportContext},
    writer::{ReportWriter, XlsxReportWriter},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub completed: bool,
    pub key: BatchKey,
    pub message: String,
    pub scan_count: usize,
    pub duration: String,
}

/// Turns a full batch into a delivered report.
///
/// The batch enters `Finalizing` through the accumulator's compare-and-swap
/// and leaves it either deleted (delivered) or `Failed` (kept for a retry).
/// The artifact scope opened for a run is released on every exit path.
pub struct FinalizePipeline {
    accumulator: Arc<BatchAccumulator>,
    delivery: Arc<DeliveryService>,
    cleanup: CleanupManager,
    reports: ReportBuilder,
    writer: Arc<dyn ReportWriter>,
}

impl fmt::Debug for FinalizePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizePipeline")
            .field("accumulator", &self.accumulator)
            .field("delivery", &self.delivery)
            .field("cleanup", &self.cleanup)
            .finish()
    }
}

impl FinalizePipeline {
    pub fn new(
        accumulator: Arc<BatchAccumulator>,
        delivery: Arc<DeliveryService>,
        cleanup: CleanupManager,
    ) -> Self {
        Self {
            accumulator,
            delivery,
            cleanup,
            reports: ReportBuilder::new(),
            writer: Arc::new(XlsxReportWriter),
        }
    }

    /// Replaces the XLSX writer.
    pub fn with_writer(mut self, writer: Arc<dyn ReportWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn accumulator(&self) -> &Arc<BatchAccumulator> {
        &self.accumulator
    }

    pub async fn finalize(
        &self,
        request: ParsedFinalize,
    ) -> Result<FinalizeOutcome, FinalizeError> {
        let ParsedFinalize {
            key,
            operator_name,
            scans,
            first_scan_time,
            last_scan_time,
        } = request;

        self.resolve(&key, operator_name.clone(), scans).await?;
        let batch = self.accumulator.begin_finalize(&key).await?;
        let mut in_flight =
            InFlight::new(Arc::clone(&self.accumulator), key.clone());

        let context = ReportContext {
            operator_name,
            first_scan_time,
            last_scan_time,
        };
        let run_id = Uuid::now_v7();
        let span = info_span!("finalize", key = %key, run_id = %run_id);

        let result = match self.run(batch, context).instrument(span).await {
            Ok(outcome) => {
                in_flight.delivered();
                if let Err(err) = self.accumulator.complete(&key).await {
                    error!(
                        key = %key,
                        run_id = %run_id,
                        error = %err,
                        "report delivered but batch could not be removed"
                    );
                }
                Ok(outcome)
            }
            Err(err) => {
                warn!(
                    key = %key,
                    run_id = %run_id,
                    code = %err.code(),
                    error = %err,
                    "finalize failed; batch retained for retry"
                );
                if let Err(store_err) = self.accumulator.fail(&key).await {
                    error!(
                        key = %key,
                        error = %store_err,
                        "could not mark batch as failed"
                    );
                }
                Err(err)
            }
        };
        in_flight.settle();
        result
    }

    /// Makes sure a batch exists for `key`: client-held scans are adopted
    /// when the store has none, and cross-checked against a full stored
    /// batch otherwise.
    async fn resolve(
        &self,
        key: &BatchKey,
        operator_name: Option<String>,
        scans: Vec<ParsedFinalizeScan>,
    ) -> Result<(), FinalizeError> {
        match self.accumulator.get(key).await? {
            Some(batch) => {
                if batch.is_full() && !scans.is_empty() {
                    cross_check(&batch, &scans)?;
                }
                Ok(())
            }
            None if scans.is_empty() => Err(FinalizeError::NotFound {
                key: key.to_string(),
            }),
            None => {
                self.accumulator.adopt(key, operator_name, scans).await?;
                Ok(())
            }
        }
    }

    async fn run(
        &self,
        batch: Batch,
        context: ReportContext,
    ) -> Result<FinalizeOutcome, FinalizeError> {
        let prepared = self.delivery.prepare()?;
        let report = self.reports.build(&batch, &context);

        let scope = self.cleanup.open_scope()?;
        let delivered = async {
            let rendered = self.writer.write(&report, &scope).await?;
            self.delivery.deliver(prepared, &rendered, &report).await
        }
        .await;
        self.cleanup.release(scope);
        let delivered = delivered?;

        info!(
            scans = report.scan_count(),
            duration = %report.duration,
            "batch finalized"
        );

        Ok(FinalizeOutcome {
            completed: true,
            key: batch.key.clone(),
            message: format!(
                "Batch {} completed and report sent to {}",
                batch.key, delivered.destination
            ),
            scan_count: report.scan_count(),
            duration: report.duration,
        })
    }
}

fn cross_check(
    batch: &Batch,
    scans: &[ParsedFinalizeScan],
) -> Result<(), FinalizeError> {
    if scans.len() != batch.len() {
        return Err(FinalizeError::ScanMismatch {
            key: batch.key.to_string(),
            reason: format!(
                "{} scans supplied, batch holds {}",
                scans.len(),
                batch.len()
            ),
        });
    }

    let mut supplied = HashSet::with_capacity(scans.len());
    if let Some(repeated) = scans
        .iter()
        .find(|scan| !supplied.insert(scan.code_value.as_str()))
    {
        return Err(FinalizeError::ScanMismatch {
            key: batch.key.to_string(),
            reason: format!(
                "code '{}' appears more than once",
                repeated.code_value
            ),
        });
    }

    let stored: HashSet<&str> = batch.codes().collect();
    if let Some(unknown) = scans
        .iter()
        .find(|scan| !stored.contains(scan.code_value.as_str()))
    {
        return Err(FinalizeError::ScanMismatch {
            key: batch.key.to_string(),
            reason: format!("code '{}' is not in the batch", unknown.code_value),
        });
    }
    Ok(())
}

/// Held while a batch is `Finalizing`. A run dropped before it settles
/// hands the batch back: removed once delivered, `Failed` otherwise.
struct InFlight {
    accumulator: Arc<BatchAccumulator>,
    key: Option<BatchKey>,
    delivered: bool,
}

impl InFlight {
    fn new(accumulator: Arc<BatchAccumulator>, key: BatchKey) -> Self {
        Self {
            accumulator,
            key: Some(key),
            delivered: false,
        }
    }

    fn delivered(&mut self) {
        self.delivered = true;
    }

    fn settle(mut self) {
        self.key = None;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let delivered = self.delivered;
        warn!(key = %key, delivered, "finalize run abandoned; releasing batch");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let accumulator = Arc::clone(&self.accumulator);
                handle.spawn(async move {
                    let released = if delivered {
                        accumulator.complete(&key).await
                    } else {
                        accumulator.fail(&key).await
                    };
                    if let Err(err) = released {
                        error!(
                            key = %key,
                            error = %err,
                            "could not release abandoned batch"
                        );
                    }
                });
            }
            Err(_) => error!(
                key = %key,
                "no runtime available to release abandoned batch"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::api_types::ParsedScan;
    use crate::batch::{
        BatchPhase, pairing::ImagePairing, store::InMemoryBatchStore,
        validator::{OpenRegistry, ScanValidator},
    };
    use crate::delivery::{
        CredentialSource, MailCredentials, MailTransport, OutgoingMail,
        TransportError,
    };
    use crate::cleanup::ArtifactScope;
    use crate::error::ErrorCode;
    use crate::report::{builder::Report, writer::RenderedReport};

    #[derive(Debug, Default)]
    struct ToggleCredentials {
        present: AtomicBool,
    }

    impl CredentialSource for ToggleCredentials {
        fn resolve(&self) -> Option<MailCredentials> {
            self.present.load(Ordering::SeqCst).then(|| MailCredentials {
                user: "sender@example.com".into(),
                secret: "app-password".into(),
            })
        }
    }

    #[derive(Debug, Default)]
    struct RecordingTransport {
        fail_send: AtomicBool,
        hang_send: AtomicBool,
        sent: Mutex<Vec<OutgoingMail>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn verify(
            &self,
            _credentials: &MailCredentials,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(
            &self,
            _credentials: &MailCredentials,
            mail: OutgoingMail,
        ) -> Result<(), TransportError> {
            if self.hang_send.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(TransportError::Send("relay unavailable".into()));
            }
            self.sent.lock().push(mail);
            Ok(())
        }
    }

    /// Leaves a partial file in the scope, then fails.
    struct PartialWriter;

    #[async_trait]
    impl ReportWriter for PartialWriter {
        async fn write(
            &self,
            report: &Report,
            scope: &ArtifactScope,
        ) -> Result<RenderedReport, FinalizeError> {
            std::fs::write(scope.path().join(&report.file_name), b"PK")
                .unwrap();
            Err(FinalizeError::Generation("workbook truncated".into()))
        }
    }

    struct Harness {
        pipeline: FinalizePipeline,
        credentials: Arc<ToggleCredentials>,
        transport: Arc<RecordingTransport>,
        work_dir: tempfile::TempDir,
    }

    fn harness(capacity: u32, credentials_present: bool) -> Harness {
        let accumulator = Arc::new(BatchAccumulator::new(
            Arc::new(InMemoryBatchStore::new()),
            ScanValidator::new(Arc::new(OpenRegistry), capacity),
            Arc::new(ImagePairing::new()),
        ));
        let credentials = Arc::new(ToggleCredentials::default());
        credentials
            .present
            .store(credentials_present, Ordering::SeqCst);
        let transport = Arc::new(RecordingTransport::default());
        let delivery = Arc::new(DeliveryService::new(
            transport.clone(),
            credentials.clone(),
            Some("ops@example.com".into()),
            true,
        ));
        let work_dir = tempfile::tempdir().unwrap();
        let pipeline = FinalizePipeline::new(
            accumulator,
            delivery,
            CleanupManager::new(Some(work_dir.path().to_path_buf())),
        );
        Harness {
            pipeline,
            credentials,
            transport,
            work_dir,
        }
    }

    fn key(raw: &str) -> BatchKey {
        BatchKey::new(raw).unwrap()
    }

    fn client_scans(codes: &[&str]) -> Vec<ParsedFinalizeScan> {
        codes
            .iter()
            .map(|code| ParsedFinalizeScan {
                code_value: (*code).into(),
                captured_at: String::new(),
                epoch_millis: None,
                image: None,
            })
            .collect()
    }

    fn request(raw_key: &str, codes: &[&str]) -> ParsedFinalize {
        ParsedFinalize {
            scans: client_scans(codes),
            ..ParsedFinalize::for_key(key(raw_key))
        }
    }

    fn leftover_artifacts(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    async fn wait_for_phase(h: &Harness, raw_key: &str, phase: BatchPhase) {
        for _ in 0..100 {
            let status =
                h.pipeline.accumulator().status(&key(raw_key)).await.unwrap();
            if status.state == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("batch {raw_key} never reached {phase:?}");
    }

    async fn scan_all(h: &Harness, operator: &str, codes: &[&str]) -> bool {
        let mut reached = false;
        for code in codes {
            let receipt = h
                .pipeline
                .accumulator()
                .submit(ParsedScan {
                    operator_id: operator.into(),
                    code_value: (*code).into(),
                    captured_at: None,
                    image: None,
                })
                .await
                .unwrap();
            reached = receipt.capacity_reached;
        }
        reached
    }

    #[tokio::test]
    async fn full_batch_is_delivered_and_removed() {
        let h = harness(3, true);
        assert!(scan_all(&h, "42", &["A", "B", "C"]).await);

        let outcome = h
            .pipeline
            .finalize(request("42", &["A", "B", "C"]))
            .await
            .unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.scan_count, 3);

        let status = h.pipeline.accumulator().status(&key("42")).await.unwrap();
        assert_eq!(status.count, 0);
        assert_eq!(h.transport.sent.lock().len(), 1);
        assert_eq!(leftover_artifacts(h.work_dir.path()), 0);
    }

    #[tokio::test]
    async fn config_error_then_retry_with_same_scans() {
        let h = harness(3, false);
        scan_all(&h, "42", &["A", "B", "C"]).await;

        let err = h
            .pipeline
            .finalize(request("42", &["A", "B", "C"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigError);
        assert_eq!(leftover_artifacts(h.work_dir.path()), 0);

        let status = h.pipeline.accumulator().status(&key("42")).await.unwrap();
        assert_eq!(status.state, BatchPhase::Failed);
        assert_eq!(status.count, 3);

        h.credentials.present.store(true, Ordering::SeqCst);
        let outcome = h
            .pipeline
            .finalize(request("42", &["A", "B", "C"]))
            .await
            .unwrap();
        assert!(outcome.completed);
        assert_eq!(h.transport.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn stateless_client_list_is_adopted() {
        let h = harness(2, true);

        let outcome = h
            .pipeline
            .finalize(request("42", &["A", "B"]))
            .await
            .unwrap();
        assert_eq!(outcome.scan_count, 2);
        assert_eq!(outcome.duration, "00:00:00");

        let sent = h.transport.sent.lock();
        assert_eq!(sent[0].subject, "Scan Batch Completed - 42");
    }

    #[tokio::test]
    async fn delivery_failure_keeps_batch_and_cleans_up() {
        let h = harness(1, true);
        h.transport.fail_send.store(true, Ordering::SeqCst);
        scan_all(&h, "42", &["A"]).await;

        let err = h
            .pipeline
            .finalize(ParsedFinalize::for_key(key("42")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeliveryFailed);
        assert_eq!(leftover_artifacts(h.work_dir.path()), 0);

        let status = h.pipeline.accumulator().status(&key("42")).await.unwrap();
        assert_eq!(status.state, BatchPhase::Failed);
    }

    #[tokio::test]
    async fn unknown_key_without_scans_is_invalid_input() {
        let h = harness(2, true);
        let err = h
            .pipeline
            .finalize(ParsedFinalize::for_key(key("nobody")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn incomplete_batch_cannot_finalize() {
        let h = harness(3, true);
        scan_all(&h, "42", &["A"]).await;

        let err = h
            .pipeline
            .finalize(ParsedFinalize::for_key(key("42")))
            .await
            .unwrap_err();
        assert!(matches!(err, FinalizeError::Incomplete { count: 1, .. }));
        assert!(h.transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn mismatched_scan_list_is_rejected() {
        let h = harness(2, true);
        scan_all(&h, "42", &["A", "B"]).await;

        let err = h
            .pipeline
            .finalize(request("42", &["A", "Z"]))
            .await
            .unwrap_err();
        assert!(matches!(err, FinalizeError::ScanMismatch { .. }));

        let status = h.pipeline.accumulator().status(&key("42")).await.unwrap();
        assert_eq!(status.state, BatchPhase::Full);
    }

    #[tokio::test]
    async fn abandoned_run_releases_batch_as_failed() {
        let h = harness(1, true);
        h.transport.hang_send.store(true, Ordering::SeqCst);
        scan_all(&h, "42", &["A"]).await;

        let attempt = tokio::time::timeout(
            Duration::from_millis(100),
            h.pipeline.finalize(ParsedFinalize::for_key(key("42"))),
        )
        .await;
        assert!(attempt.is_err(), "send should still be hanging");

        wait_for_phase(&h, "42", BatchPhase::Failed).await;
        assert_eq!(leftover_artifacts(h.work_dir.path()), 0);

        h.transport.hang_send.store(false, Ordering::SeqCst);
        let outcome = h
            .pipeline
            .finalize(ParsedFinalize::for_key(key("42")))
            .await
            .unwrap();
        assert!(outcome.completed);
    }

    #[tokio::test]
    async fn abandoned_run_can_be_reset() {
        let h = harness(1, true);
        h.transport.hang_send.store(true, Ordering::SeqCst);
        scan_all(&h, "42", &["A"]).await;

        let _ = tokio::time::timeout(
            Duration::from_millis(100),
            h.pipeline.finalize(ParsedFinalize::for_key(key("42"))),
        )
        .await;
        wait_for_phase(&h, "42", BatchPhase::Failed).await;

        assert!(h.pipeline.accumulator().reset(&key("42")).await.unwrap());
        let status = h.pipeline.accumulator().status(&key("42")).await.unwrap();
        assert_eq!(status.state, BatchPhase::Empty);
    }

    #[tokio::test]
    async fn generation_failure_keeps_batch_and_cleans_up() {
        let h = harness(2, true);
        let h = Harness {
            pipeline: h.pipeline.with_writer(Arc::new(PartialWriter)),
            ..h
        };
        scan_all(&h, "42", &["A", "B"]).await;

        let err = h
            .pipeline
            .finalize(ParsedFinalize::for_key(key("42")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::GenerationFailed);
        assert_eq!(leftover_artifacts(h.work_dir.path()), 0);
        assert!(h.transport.sent.lock().is_empty());

        let status = h.pipeline.accumulator().status(&key("42")).await.unwrap();
        assert_eq!(status.state, BatchPhase::Failed);
        assert_eq!(status.count, 2);
    }

    #[tokio::test]
    async fn repeated_code_in_client_list_is_rejected() {
        let h = harness(2, true);
        scan_all(&h, "42", &["A", "B"]).await;

        let err = h
            .pipeline
            .finalize(request("42", &["A", "A"]))
            .await
            .unwrap_err();
        assert!(matches!(err, FinalizeError::ScanMismatch { .. }));

        let status = h.pipeline.accumulator().status(&key("42")).await.unwrap();
        assert_eq!(status.state, BatchPhase::Full);
    }
}
