use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ferret::client::SolanaLedgerClient;
use ferret::config::MonitorConfig;
use ferret::ingest::{IngestQueue, LogSubscriber, SubscriberConfig};
use ferret::pipeline::{
    DetectionStore, Dispatcher, DispatcherConfig, FilterPipeline, PipelineConfig,
};
use ferret::server;

struct ServiceOrchestrator {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl ServiceOrchestrator {
    fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    #[instrument(skip(self, config))]
    async fn start_all_services(&mut self, config: MonitorConfig) -> Result<()> {
        info!("🚀 Starting all Ferret services");

        let queue = Arc::new(IngestQueue::new(config.queue_capacity()));
        let store = Arc::new(DetectionStore::new());

        let ledger = Arc::new(SolanaLedgerClient::new(
            config.rpc_url.clone(),
            config.rpc_timeout(),
        ));
        let pipeline = Arc::new(FilterPipeline::new(
            ledger,
            PipelineConfig {
                tracked_mint: config.tracked_mint.clone(),
                history_cap: config.history_cap,
                min_sol_balance: config.min_sol_balance,
                max_account_age_secs: config.max_account_age_secs(),
            },
        ));

        // Log subscription service
        let mut subscriber_shutdown = self.shutdown_tx.subscribe();
        let subscriber = LogSubscriber::new(
            SubscriberConfig {
                ws_url: config.ws_url.clone(),
                ..SubscriberConfig::default()
            },
            queue.clone(),
        );
        let subscriber_task = tokio::spawn(async move {
            info!("📡 Ferret Ingest - Log Subscription Service starting");

            tokio::select! {
                result = subscriber.run() => {
                    match &result {
                        Ok(()) => info!("Log subscription completed"),
                        Err(e) => error!("Log subscription error: {}", e),
                    }
                    result
                }
                _ = subscriber_shutdown.recv() => {
                    info!("🛑 Log subscription shutting down gracefully");
                    Ok(())
                }
            }
        });
        self.tasks.push(subscriber_task);

        // Dispatcher service
        let mut dispatcher_shutdown = self.shutdown_tx.subscribe();
        let dispatcher = Dispatcher::new(
            queue,
            pipeline,
            store.clone(),
            DispatcherConfig {
                max_per_second: config.max_txns_per_second,
                tick_ms: config.dispatch_tick_ms,
                max_inflight: config.max_inflight_pipelines,
            },
        );
        let dispatcher_task = tokio::spawn(async move {
            info!("🔍 Ferret Dispatcher - Candidate Vetting Service starting");

            tokio::select! {
                result = dispatcher.run() => {
                    match &result {
                        Ok(()) => info!("Dispatcher completed"),
                        Err(e) => error!("Dispatcher error: {}", e),
                    }
                    result
                }
                _ = dispatcher_shutdown.recv() => {
                    info!("🛑 Dispatcher shutting down gracefully");
                    Ok(())
                }
            }
        });
        self.tasks.push(dispatcher_task);

        // Query endpoint service
        let mut server_shutdown = self.shutdown_tx.subscribe();
        let listen_addr = config.listen_addr.clone();
        let server_task = tokio::spawn(async move {
            info!("🌐 Ferret Query - Detection Query Service starting");

            tokio::select! {
                result = server::serve(&listen_addr, store) => {
                    match &result {
                        Ok(()) => info!("Query endpoint completed"),
                        Err(e) => error!("Query endpoint error: {}", e),
                    }
                    result
                }
                _ = server_shutdown.recv() => {
                    info!("🛑 Query endpoint shutting down gracefully");
                    Ok(())
                }
            }
        });
        self.tasks.push(server_task);

        info!("✅ All {} services started successfully", self.tasks.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn shutdown_all(&mut self) -> Result<()> {
        info!("🛑 Shutting down all services");

        let _ = self.shutdown_tx.send(());
        debug!("Shutdown signal sent to all services");

        let mut results = Vec::new();
        for task in self.tasks.drain(..) {
            results.push(task.await);
        }

        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(Ok(())) => info!("✅ Service {} shut down cleanly", i + 1),
                Ok(Err(e)) => warn!("⚠️  Service {} error during shutdown: {}", i + 1, e),
                Err(e) => error!("❌ Service {} task failed: {}", i + 1, e),
            }
        }

        info!("✅ All services shut down successfully");
        Ok(())
    }
}

fn init_tracing() -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "ferret.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .json()
        .with_current_span(false)
        .with_span_list(true);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Keep the file appender alive for the process lifetime
    std::mem::forget(guard);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("🦡 Ferret - Fresh Wallet Monitor");
    info!("================================");

    let config = MonitorConfig::from_env();
    info!(
        tracked_mint = %config.tracked_mint,
        max_txns_per_second = config.max_txns_per_second,
        min_sol_balance = config.min_sol_balance,
        max_account_age_days = config.max_account_age_days,
        "Configuration loaded"
    );

    let mut orchestrator = ServiceOrchestrator::new();

    match orchestrator.start_all_services(config).await {
        Ok(()) => {
            info!("🎯 Ferret is now monitoring token transactions in real-time");
            info!("Press Ctrl+C to shutdown all services");
        }
        Err(e) => {
            error!("Failed to start services: {}", e);
            return Err(e);
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("🛑 Shutdown signal received");
        }
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    orchestrator.shutdown_all().await?;

    info!("👋 Ferret shutdown complete");
    Ok(())
}
