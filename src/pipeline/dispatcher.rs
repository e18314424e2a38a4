use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, instrument};

use crate::ingest::queue::IngestQueue;
use crate::pipeline::filters::{FilterPipeline, PipelineOutcome};
use crate::pipeline::store::DetectionStore;

/// Dispatcher tuning knobs. Dispatch rate and in-flight concurrency are
/// deliberately independent: the gate bounds how often a pipeline run
/// *starts*, the semaphore bounds how many are outstanding at once.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum pipeline starts per second
    pub max_per_second: u32,
    /// Fixed tick period in milliseconds
    pub tick_ms: u64,
    /// Maximum concurrently outstanding pipeline runs
    pub max_inflight: usize,
}

/// Minimum-interval gate over dispatch starts.
///
/// A dispatch may start only when at least `1000 / max_per_second` ms
/// have elapsed since the previous dispatch start. The gate is consumed
/// at the observed tick time, not at pipeline completion.
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    last_dispatch: Option<Instant>,
}

impl RateGate {
    pub fn new(max_per_second: u32) -> Self {
        let max_per_second = max_per_second.max(1);
        Self {
            // Integer millisecond division would truncate for rates that
            // do not divide 1000, admitting an extra start per second.
            min_interval: Duration::from_secs_f64(1.0 / f64::from(max_per_second)),
            last_dispatch: None,
        }
    }

    /// Consumes the gate for `now` if the minimum interval has elapsed.
    pub fn try_pass(&mut self, now: Instant) -> bool {
        match self.last_dispatch {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_dispatch = Some(now);
                true
            }
        }
    }
}

/// Timer-driven loop that drains the ingest queue through the filter
/// pipeline at a bounded rate.
///
/// Each tick claims at most one candidate, and only when the rate gate
/// allows a start and an in-flight permit is free. A tick that cannot
/// claim leaves the head candidate in place for the next one. Pipeline
/// runs execute on spawned tasks, so detections land in the store in
/// completion order, not dispatch order.
pub struct Dispatcher {
    queue: Arc<IngestQueue>,
    pipeline: Arc<FilterPipeline>,
    store: Arc<DetectionStore>,
    permits: Arc<Semaphore>,
    gate: RateGate,
    tick: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tick", &self.tick)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        queue: Arc<IngestQueue>,
        pipeline: Arc<FilterPipeline>,
        store: Arc<DetectionStore>,
        config: DispatcherConfig,
    ) -> Self {
        info!(
            max_per_second = config.max_per_second,
            tick_ms = config.tick_ms,
            max_inflight = config.max_inflight,
            "Initializing dispatcher"
        );

        Self {
            queue,
            pipeline,
            store,
            permits: Arc::new(Semaphore::new(config.max_inflight)),
            gate: RateGate::new(config.max_per_second),
            tick: Duration::from_millis(config.tick_ms),
        }
    }

    /// Runs the tick loop indefinitely.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        info!("Dispatcher: starting tick loop");

        let mut interval = tokio::time::interval(self.tick);
        let mut tick_counter = 0u64;

        loop {
            interval.tick().await;
            tick_counter += 1;

            self.poll_once(Instant::now());

            // Status roughly once a minute at the default 100ms tick
            if tick_counter % 600 == 0 {
                self.log_status().await;
            }
        }
    }

    /// One tick: claim and dispatch at most one candidate. Returns the
    /// dispatched signature, or `None` if nothing was claimed.
    pub fn poll_once(&mut self, now: Instant) -> Option<String> {
        if self.queue.is_empty() {
            return None;
        }

        // Permit first: if all pipeline slots are busy the gate must not
        // be consumed, or throughput would be silently lost.
        let permit = self.permits.clone().try_acquire_owned().ok()?;

        if !self.gate.try_pass(now) {
            return None;
        }

        let candidate = self.queue.dequeue_one()?;
        let signature = candidate.signature.clone();
        debug!(signature = %signature, "Dispatching candidate");

        let pipeline = self.pipeline.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let PipelineOutcome::Detected(detection) = pipeline.process(&candidate).await {
                store.append(detection).await;
            }
        });

        Some(signature)
    }

    async fn log_status(&self) {
        let stats = self.pipeline.stats();
        info!(
            queue_len = self.queue.len(),
            queue_dropped = self.queue.dropped_total(),
            inflight = self.permits.available_permits(),
            processed = stats.processed,
            detections = stats.detections,
            rejections = stats.rejections,
            lookup_failures = stats.lookup_failures,
            "📊 Monitoring status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ledger::{LedgerClient, LedgerError};
    use crate::core::types::{Candidate, HistoryEntry, TokenBalanceInfo, TransactionDetail};
    use crate::pipeline::filters::PipelineConfig;
    use async_trait::async_trait;
    use chrono::Utc;

    const TRACKED_MINT: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

    /// Rejects everything at stage 1.
    struct NullLedger;

    #[async_trait]
    impl LedgerClient for NullLedger {
        async fn transaction_detail(
            &self,
            _signature: &str,
        ) -> Result<Option<TransactionDetail>, LedgerError> {
            Ok(None)
        }

        async fn signature_history(
            &self,
            _address: &str,
            _limit: usize,
        ) -> Result<Vec<HistoryEntry>, LedgerError> {
            Ok(vec![])
        }

        async fn lamport_balance(&self, _address: &str) -> Result<u64, LedgerError> {
            Ok(0)
        }
    }

    /// Passes every candidate whose signature matches its single
    /// history entry.
    struct PassingLedger;

    #[async_trait]
    impl LedgerClient for PassingLedger {
        async fn transaction_detail(
            &self,
            signature: &str,
        ) -> Result<Option<TransactionDetail>, LedgerError> {
            Ok(Some(TransactionDetail {
                signature: signature.to_string(),
                fee_payer: Some("fresh-wallet".to_string()),
                pre_token_balances: Some(vec![]),
                post_token_balances: Some(vec![TokenBalanceInfo {
                    mint: TRACKED_MINT.to_string(),
                    owner: Some("fresh-wallet".to_string()),
                    ui_amount: Some(1.0),
                }]),
            }))
        }

        async fn signature_history(
            &self,
            _address: &str,
            _limit: usize,
        ) -> Result<Vec<HistoryEntry>, LedgerError> {
            Ok(vec![HistoryEntry {
                signature: "sig-0".to_string(),
                block_time: Some(Utc::now().timestamp() - 60),
            }])
        }

        async fn lamport_balance(&self, _address: &str) -> Result<u64, LedgerError> {
            Ok(1_000_000_000)
        }
    }

    fn pipeline_config() -> PipelineConfig {
        PipelineConfig {
            tracked_mint: TRACKED_MINT.to_string(),
            history_cap: 10,
            min_sol_balance: 0.01,
            max_account_age_secs: 7 * 86_400,
        }
    }

    fn dispatcher(
        client: Arc<dyn LedgerClient>,
        max_per_second: u32,
        max_inflight: usize,
    ) -> (Dispatcher, Arc<IngestQueue>, Arc<DetectionStore>) {
        let queue = Arc::new(IngestQueue::new(2 * max_per_second as usize));
        let pipeline = Arc::new(FilterPipeline::new(client, pipeline_config()));
        let store = Arc::new(DetectionStore::new());
        let dispatcher = Dispatcher::new(
            queue.clone(),
            pipeline,
            store.clone(),
            DispatcherConfig {
                max_per_second,
                tick_ms: 100,
                max_inflight,
            },
        );
        (dispatcher, queue, store)
    }

    #[test]
    fn rate_gate_enforces_minimum_interval() {
        let mut gate = RateGate::new(3);
        let t0 = Instant::now();

        assert!(gate.try_pass(t0));
        assert!(!gate.try_pass(t0 + Duration::from_millis(100)));
        assert!(!gate.try_pass(t0 + Duration::from_millis(300)));
        assert!(gate.try_pass(t0 + Duration::from_millis(400)));
    }

    #[test]
    fn rate_gate_never_exceeds_rate_in_a_rolling_second() {
        let mut gate = RateGate::new(3);
        let t0 = Instant::now();

        // Tick every 100ms for 3 simulated seconds, count passes per
        // rolling 1-second window by start offsets.
        let mut passes = Vec::new();
        for tick in 0..30u64 {
            let now = t0 + Duration::from_millis(tick * 100);
            if gate.try_pass(now) {
                passes.push(tick * 100);
            }
        }

        for start in &passes {
            let in_window = passes
                .iter()
                .filter(|p| **p >= *start && **p < *start + 1000)
                .count();
            assert!(in_window <= 3, "{in_window} dispatch starts within one second");
        }
    }

    #[test]
    fn rate_gate_holds_at_exact_interval_multiples() {
        // 3/s does not divide 1000ms evenly; ticks landing on the
        // truncated 333ms grid must still never admit a fourth start
        // inside a rolling second.
        let mut gate = RateGate::new(3);
        let t0 = Instant::now();

        let mut passes = Vec::new();
        for step in 0..12u64 {
            let now = t0 + Duration::from_millis(step * 333);
            if gate.try_pass(now) {
                passes.push(step * 333);
            }
        }

        for start in &passes {
            let in_window = passes
                .iter()
                .filter(|p| **p >= *start && **p < *start + 1000)
                .count();
            assert!(in_window <= 3, "{in_window} dispatch starts within one second");
        }
    }

    #[tokio::test]
    async fn empty_queue_tick_is_a_noop() {
        let (mut dispatcher, _queue, _store) = dispatcher(Arc::new(NullLedger), 3, 4);
        assert!(dispatcher.poll_once(Instant::now()).is_none());
    }

    #[tokio::test]
    async fn dispatch_follows_queue_order() {
        let (mut dispatcher, queue, _store) = dispatcher(Arc::new(NullLedger), 1000, 8);
        queue.enqueue(Candidate::new("sig-a"));
        queue.enqueue(Candidate::new("sig-b"));

        let t0 = Instant::now();
        assert_eq!(dispatcher.poll_once(t0).as_deref(), Some("sig-a"));
        assert_eq!(
            dispatcher
                .poll_once(t0 + Duration::from_millis(10))
                .as_deref(),
            Some("sig-b")
        );
    }

    #[tokio::test]
    async fn gated_tick_leaves_candidate_at_head() {
        let (mut dispatcher, queue, _store) = dispatcher(Arc::new(NullLedger), 3, 4);
        queue.enqueue(Candidate::new("sig-a"));
        queue.enqueue(Candidate::new("sig-b"));

        let t0 = Instant::now();
        assert_eq!(dispatcher.poll_once(t0).as_deref(), Some("sig-a"));

        // Same tick instant: gate refuses, head stays put.
        assert!(dispatcher.poll_once(t0).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(
            dispatcher
                .poll_once(t0 + Duration::from_millis(400))
                .as_deref(),
            Some("sig-b")
        );
    }

    #[tokio::test]
    async fn no_inflight_permit_means_no_dispatch() {
        let (mut dispatcher, queue, _store) = dispatcher(Arc::new(NullLedger), 3, 0);
        queue.enqueue(Candidate::new("sig-a"));

        assert!(dispatcher.poll_once(Instant::now()).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn detection_lands_in_the_store() {
        let (mut dispatcher, queue, store) = dispatcher(Arc::new(PassingLedger), 3, 4);
        queue.enqueue(Candidate::new("sig-0"));

        assert!(dispatcher.poll_once(Instant::now()).is_some());

        tokio::time::timeout(Duration::from_secs(1), async {
            while store.len().await == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("detection never appended");

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].wallet, "fresh-wallet");
        assert_eq!(snapshot[0].signature, "sig-0");
    }
}
