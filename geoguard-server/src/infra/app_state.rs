use std::{fmt, sync::Arc};

use tracing::info;

use geoguard_config::Config;
use geoguard_core::{
    BatchAccumulator, CleanupManager, DeliveryService, FinalizePipeline,
    ImagePairing, InMemoryBatchStore, MailTransport, OpenRegistry,
    OperatorRegistry, ScanValidator, StaticCredentials, StaticRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub accumulator: Arc<BatchAccumulator>,
    pub pipeline: Arc<FinalizePipeline>,
    /// Finalize in the background once a submit fills a batch.
    pub auto_finalize: bool,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("auto_finalize", &self.auto_finalize)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(pipeline: Arc<FinalizePipeline>, auto_finalize: bool) -> Self {
        Self {
            accumulator: Arc::clone(pipeline.accumulator()),
            pipeline,
            auto_finalize,
        }
    }

    /// Wires the in-memory store, registry, delivery and cleanup from
    /// loaded configuration around the given mail transport.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let registry: Arc<dyn OperatorRegistry> =
            match &config.operators.allow_list {
                Some(entries) => {
                    info!(operators = entries.len(), "operator allow-list active");
                    Arc::new(StaticRegistry::from_entries(
                        entries
                            .iter()
                            .map(|entry| (entry.id.clone(), entry.name.clone())),
                    ))
                }
                None => Arc::new(OpenRegistry),
            };

        let accumulator = Arc::new(BatchAccumulator::new(
            Arc::new(InMemoryBatchStore::new()),
            ScanValidator::new(registry, config.batch.capacity),
            Arc::new(ImagePairing::new()),
        ));

        let credentials = Arc::new(StaticCredentials::new(
            config.mail.user.clone(),
            config.mail.password.clone(),
        ));
        let delivery = Arc::new(DeliveryService::new(
            transport,
            credentials,
            config.mail.to.clone(),
            config.mail.verify_before_send,
        ));

        let pipeline = Arc::new(FinalizePipeline::new(
            accumulator,
            delivery,
            CleanupManager::new(config.report.work_dir.clone()),
        ));

        Self::new(pipeline, config.batch.auto_finalize)
    }
}
