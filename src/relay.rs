//! Enable/disable/configure lifecycle for the relay pipeline

use crate::config::Settings;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::logging::log_error;
use crate::metadata::MetadataCache;
use crate::router::RoutingTable;
use crate::source::{ConnectionManager, Enricher, SourceClient};
use crate::telegram::TelegramClient;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Capacity of the event, message and error channels
pub const CHANNEL_CAPACITY: usize = 100;

/// One running instance of connection manager, enricher and dispatcher
struct Pipeline {
    run_id: Uuid,
    cancel: CancellationToken,
    connection: Arc<ConnectionManager>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns configuration snapshots and the currently running pipeline
pub struct Relay {
    settings: ArcSwap<Settings>,
    routing: Arc<ArcSwap<RoutingTable>>,
    root: CancellationToken,
    pipeline: Mutex<Option<Pipeline>>,
}

impl Relay {
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let routing = RoutingTable::from(&settings.telegram);

        Ok(Self {
            settings: ArcSwap::from_pointee(settings),
            routing: Arc::new(ArcSwap::from_pointee(routing)),
            root: CancellationToken::new(),
            pipeline: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn routing(&self) -> Arc<RoutingTable> {
        self.routing.load_full()
    }

    pub async fn is_enabled(&self) -> bool {
        self.pipeline.lock().await.is_some()
    }

    /// Id of the running pipeline, if enabled
    pub async fn run_id(&self) -> Option<Uuid> {
        self.pipeline.lock().await.as_ref().map(|p| p.run_id)
    }

    /// Start the pipeline; a no-op when already running
    pub async fn enable(&self) -> Result<()> {
        let mut pipeline = self.pipeline.lock().await;
        if pipeline.is_some() {
            tracing::debug!("Relay already enabled");
            return Ok(());
        }

        let started = self.start()?;
        tracing::info!(run_id = %started.run_id, "Relay enabled");
        *pipeline = Some(started);
        Ok(())
    }

    /// Stop the pipeline and close the stream connection
    pub async fn disable(&self) -> Result<()> {
        let Some(running) = self.pipeline.lock().await.take() else {
            tracing::debug!("Relay already disabled");
            return Ok(());
        };

        let run_id = running.run_id;
        Self::stop(running).await?;
        tracing::info!(run_id = %run_id, "Relay disabled");
        Ok(())
    }

    /// Validate and atomically install new settings, restarting if running
    pub async fn configure(&self, settings: Settings) -> Result<()> {
        settings.validate()?;

        let mut pipeline = self.pipeline.lock().await;
        tracing::info!(
            targets = settings.telegram.targets.len(),
            "Relay configuration updated"
        );
        self.routing.store(Arc::new(RoutingTable::from(&settings.telegram)));
        self.settings.store(Arc::new(settings));

        if let Some(running) = pipeline.take() {
            tracing::info!(run_id = %running.run_id, "Restarting relay with new configuration");
            if let Err(e) = Self::stop(running).await {
                log_error("relay_restart_stop", &e);
            }
            *pipeline = Some(self.start()?);
        }
        Ok(())
    }

    fn start(&self) -> Result<Pipeline> {
        let settings = self.settings.load_full();
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("relay", run_id = %run_id);
        let cancel = self.root.child_token();

        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (message_tx, message_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let source = Arc::new(SourceClient::new(&settings.source)?);
        let connection = Arc::new(ConnectionManager::new(
            &source,
            &settings.source,
            &cancel,
            event_tx,
            error_tx.clone(),
        )?);
        let cache = Arc::new(MetadataCache::new(source));
        let enricher = Enricher::new(cache.clone());
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.routing),
            TelegramClient::new(settings.telegram.api_base_url.clone(), error_tx.clone()),
        );

        let mut tasks = vec![cache.spawn_sweeper(cancel.clone())];

        let conn = Arc::clone(&connection);
        tasks.push(tokio::spawn(
            async move { conn.run().await }.instrument(span.clone()),
        ));

        let token = cancel.clone();
        tasks.push(tokio::spawn(
            async move { enricher.run(event_rx, message_tx, error_tx, token).await }
                .instrument(span.clone()),
        ));

        let token = cancel.clone();
        tasks.push(tokio::spawn(
            async move { dispatcher.run(message_rx, error_rx, token).await }.instrument(span),
        ));

        Ok(Pipeline {
            run_id,
            cancel,
            connection,
            tasks,
        })
    }

    async fn stop(pipeline: Pipeline) -> Result<()> {
        pipeline.cancel.cancel();
        let closed = pipeline.connection.close().await;

        for task in pipeline.tasks {
            if let Err(e) = task.await {
                tracing::warn!(run_id = %pipeline.run_id, error = %e, "Relay task ended abnormally");
            }
        }
        closed
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
