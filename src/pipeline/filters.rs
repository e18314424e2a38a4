use chrono::Utc;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::client::ledger::{LedgerClient, LedgerError};
use crate::core::types::{Candidate, Detection};

pub const STAGE_TOKEN_RELEVANCE: &str = "token_relevance";
pub const STAGE_WALLET_FRESHNESS: &str = "wallet_freshness";
pub const STAGE_FIRST_TOKEN_INTERACTION: &str = "first_token_interaction";
pub const STAGE_MIN_BALANCE: &str = "min_balance";

/// Thresholds the filter stages apply.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The single token mint being watched
    pub tracked_mint: String,
    /// How many recent signatures to inspect per wallet
    pub history_cap: usize,
    /// Minimum SOL balance a detected wallet must hold
    pub min_sol_balance: f64,
    /// Maximum wallet age, measured from the oldest entry in the
    /// bounded history window
    pub max_account_age_secs: i64,
}

/// Why a candidate was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Transaction unknown to the RPC node
    MissingDetail,
    /// Transaction carries no token balance sections at all
    MissingTokenBalances,
    /// No post-transaction balance references the tracked mint
    NotTrackedToken,
    /// Transaction message had no account keys
    MissingFeePayer,
    /// Wallet has no visible signature history
    NoHistory,
    /// Oldest history entry has no block time
    MissingBlockTime,
    /// Oldest history entry is older than the age threshold
    WalletTooOld,
    /// Wallet already touched token balances in a newer history entry
    PriorTokenActivity,
    /// Current balance below the configured minimum
    InsufficientBalance,
}

/// Result of one pipeline run. A lookup failure is deliberately kept
/// distinct from a clean rejection so operators can tell "filtered out"
/// from "lost to a transient RPC failure"; neither produces a Detection
/// and neither is retried.
#[derive(Debug)]
pub enum PipelineOutcome {
    Detected(Detection),
    Rejected {
        stage: &'static str,
        reason: RejectReason,
    },
    Failed {
        stage: &'static str,
        error: LedgerError,
    },
}

/// Running counters over pipeline outcomes.
#[derive(Debug, Default)]
pub struct PipelineStats {
    processed: AtomicU64,
    detections: AtomicU64,
    rejections: AtomicU64,
    lookup_failures: AtomicU64,
}

/// Point-in-time copy of the counters for logging.
#[derive(Debug, Clone)]
pub struct PipelineStatsSnapshot {
    pub processed: u64,
    pub detections: u64,
    pub rejections: u64,
    pub lookup_failures: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
        }
    }
}

/// Four ordered, short-circuiting checks applied to each dispatched
/// candidate:
///
/// 1. the transaction's post token balances reference the tracked mint;
/// 2. the actor wallet's oldest visible history entry is recent enough;
/// 3. no newer history entry already touched token balances;
/// 4. the actor wallet holds at least the minimum SOL balance.
///
/// The actor for stages 2-4 is the transaction's fee-payer slot (first
/// account key), not necessarily the token-balance holder.
pub struct FilterPipeline {
    client: Arc<dyn LedgerClient>,
    config: PipelineConfig,
    stats: PipelineStats,
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FilterPipeline {
    pub fn new(client: Arc<dyn LedgerClient>, config: PipelineConfig) -> Self {
        Self {
            client,
            config,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs all stages against one candidate. Never panics and never
    /// propagates an error: every outcome is folded into the returned
    /// `PipelineOutcome`.
    #[instrument(skip(self), fields(signature = %candidate.signature))]
    pub async fn process(&self, candidate: &Candidate) -> PipelineOutcome {
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        debug!("🔍 Checking candidate transaction");

        let outcome = self.run_stages(candidate).await;

        match &outcome {
            PipelineOutcome::Detected(detection) => {
                self.stats.detections.fetch_add(1, Ordering::Relaxed);
                debug!(wallet = %detection.wallet, "Candidate passed all filter stages");
            }
            PipelineOutcome::Rejected { stage, reason } => {
                self.stats.rejections.fetch_add(1, Ordering::Relaxed);
                debug!(stage, reason = ?reason, "Candidate rejected");
            }
            PipelineOutcome::Failed { stage, error } => {
                self.stats.lookup_failures.fetch_add(1, Ordering::Relaxed);
                warn!(stage, error = %error, "Lookup failed, dropping candidate");
            }
        }

        outcome
    }

    async fn run_stages(&self, candidate: &Candidate) -> PipelineOutcome {
        let signature = candidate.signature.as_str();

        // Stage 1: does the transaction involve the tracked mint?
        let detail = match self.client.transaction_detail(signature).await {
            Ok(Some(detail)) => detail,
            Ok(None) => return rejected(STAGE_TOKEN_RELEVANCE, RejectReason::MissingDetail),
            Err(error) => return failed(STAGE_TOKEN_RELEVANCE, error),
        };

        let post_balances = match &detail.post_token_balances {
            Some(balances) => balances,
            None => return rejected(STAGE_TOKEN_RELEVANCE, RejectReason::MissingTokenBalances),
        };

        if !post_balances
            .iter()
            .any(|balance| balance.mint == self.config.tracked_mint)
        {
            return rejected(STAGE_TOKEN_RELEVANCE, RejectReason::NotTrackedToken);
        }

        let wallet = match detail.fee_payer {
            Some(wallet) => wallet,
            None => return rejected(STAGE_TOKEN_RELEVANCE, RejectReason::MissingFeePayer),
        };

        // Stage 2: is the wallet new enough? The window is a bounded
        // approximation of account age: only the most recent
        // `history_cap` signatures are visible, so a wallet with older
        // activity beyond the window can slip through. Kept as-is.
        let history = match self
            .client
            .signature_history(&wallet, self.config.history_cap)
            .await
        {
            Ok(history) => history,
            Err(error) => return failed(STAGE_WALLET_FRESHNESS, error),
        };

        let oldest = match history.last() {
            Some(oldest) => oldest,
            None => return rejected(STAGE_WALLET_FRESHNESS, RejectReason::NoHistory),
        };

        let oldest_time = match oldest.block_time {
            Some(time) => time,
            None => return rejected(STAGE_WALLET_FRESHNESS, RejectReason::MissingBlockTime),
        };

        let now = Utc::now().timestamp();
        if now - oldest_time > self.config.max_account_age_secs {
            return rejected(STAGE_WALLET_FRESHNESS, RejectReason::WalletTooOld);
        }

        // Stage 3: is this the wallet's first token interaction? Walk
        // newest to oldest and stop at the candidate's own signature;
        // entries the node no longer knows are skipped.
        for entry in &history {
            if entry.signature == candidate.signature {
                break;
            }

            let earlier = match self.client.transaction_detail(&entry.signature).await {
                Ok(earlier) => earlier,
                Err(error) => return failed(STAGE_FIRST_TOKEN_INTERACTION, error),
            };

            let Some(earlier) = earlier else {
                continue;
            };

            let touched_tokens = earlier
                .pre_token_balances
                .as_ref()
                .is_some_and(|balances| !balances.is_empty())
                || earlier
                    .post_token_balances
                    .as_ref()
                    .is_some_and(|balances| !balances.is_empty());

            if touched_tokens {
                return rejected(
                    STAGE_FIRST_TOKEN_INTERACTION,
                    RejectReason::PriorTokenActivity,
                );
            }
        }

        // Stage 4: does the wallet hold the minimum balance?
        let lamports = match self.client.lamport_balance(&wallet).await {
            Ok(lamports) => lamports,
            Err(error) => return failed(STAGE_MIN_BALANCE, error),
        };

        let sol_balance = lamports as f64 / LAMPORTS_PER_SOL as f64;
        if sol_balance < self.config.min_sol_balance {
            return rejected(STAGE_MIN_BALANCE, RejectReason::InsufficientBalance);
        }

        PipelineOutcome::Detected(Detection {
            wallet,
            signature: candidate.signature.clone(),
            sol_balance,
            timestamp: Utc::now(),
        })
    }
}

fn rejected(stage: &'static str, reason: RejectReason) -> PipelineOutcome {
    PipelineOutcome::Rejected { stage, reason }
}

fn failed(stage: &'static str, error: LedgerError) -> PipelineOutcome {
    PipelineOutcome::Failed { stage, error }
}
