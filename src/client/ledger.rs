use async_trait::async_trait;
use serde_json::json;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_request::RpcRequest;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::{ParsePubkeyError, Pubkey};
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiMessage,
    UiTransactionEncoding, UiTransactionTokenBalance,
};
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument};

use crate::core::types::{HistoryEntry, TokenBalanceInfo, TransactionDetail};

/// Failures at the ledger lookup boundary.
///
/// "Not found" / empty results are *not* errors; they come back as
/// `Ok(None)` / `Ok(vec![])` from the trait methods.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid address {address}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: ParsePubkeyError,
    },
    #[error("rpc request timed out after {0:?}")]
    Timeout(Duration),
    #[error("rpc request failed: {0}")]
    Rpc(#[from] ClientError),
}

/// Read-only point lookups against the ledger.
///
/// The pipeline only ever talks to this trait, so tests can swap in a
/// scripted implementation with per-method call counters.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetches a confirmed transaction by signature. `Ok(None)` means
    /// the node does not know the signature.
    async fn transaction_detail(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionDetail>, LedgerError>;

    /// Fetches up to `limit` of the address's most recent signatures,
    /// newest-first. An unknown or inactive address yields an empty list.
    async fn signature_history(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, LedgerError>;

    /// Fetches the address's current balance in lamports.
    async fn lamport_balance(&self, address: &str) -> Result<u64, LedgerError>;
}

/// Production ledger client backed by a Solana JSON-RPC node.
///
/// Every call is bounded by `request_timeout`; a hung node surfaces as
/// `LedgerError::Timeout` instead of stalling a pipeline run forever.
pub struct SolanaLedgerClient {
    rpc: RpcClient,
    request_timeout: Duration,
}

impl std::fmt::Debug for SolanaLedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaLedgerClient")
            .field("url", &self.rpc.url())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl SolanaLedgerClient {
    pub fn new(rpc_url: String, request_timeout: Duration) -> Self {
        let rpc = RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed());
        Self {
            rpc,
            request_timeout,
        }
    }

    fn parse_pubkey(address: &str) -> Result<Pubkey, LedgerError> {
        Pubkey::from_str(address).map_err(|source| LedgerError::InvalidAddress {
            address: address.to_string(),
            source,
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        match timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(LedgerError::from),
            Err(_) => Err(LedgerError::Timeout(self.request_timeout)),
        }
    }
}

#[async_trait]
impl LedgerClient for SolanaLedgerClient {
    #[instrument(skip(self))]
    async fn transaction_detail(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionDetail>, LedgerError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };

        // Issue the request through `send` so a null result deserializes
        // to `None` instead of erroring inside the client.
        let encoded: Option<EncodedConfirmedTransactionWithStatusMeta> = self
            .bounded(self.rpc.send(
                RpcRequest::GetTransaction,
                json!([signature, config]),
            ))
            .await?;

        debug!(signature = %signature, found = encoded.is_some(), "Fetched transaction detail");

        Ok(encoded.map(|tx| normalize_transaction(signature, tx)))
    }

    #[instrument(skip(self))]
    async fn signature_history(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        let pubkey = Self::parse_pubkey(address)?;

        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: None,
            limit: Some(limit),
            commitment: Some(CommitmentConfig::confirmed()),
        };

        let statuses = self
            .bounded(self.rpc.get_signatures_for_address_with_config(&pubkey, config))
            .await?;

        debug!(address = %address, entries = statuses.len(), "Fetched signature history");

        Ok(statuses
            .into_iter()
            .map(|status| HistoryEntry {
                signature: status.signature,
                block_time: status.block_time,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn lamport_balance(&self, address: &str) -> Result<u64, LedgerError> {
        let pubkey = Self::parse_pubkey(address)?;
        self.bounded(self.rpc.get_balance(&pubkey)).await
    }
}

/// Flattens the RPC response shape into the pipeline's view of a
/// transaction: fee payer plus the two token balance sections.
fn normalize_transaction(
    signature: &str,
    encoded: EncodedConfirmedTransactionWithStatusMeta,
) -> TransactionDetail {
    let fee_payer = first_account_key(&encoded.transaction.transaction);

    let (pre_token_balances, post_token_balances) = match encoded.transaction.meta {
        Some(meta) => (
            Option::<Vec<UiTransactionTokenBalance>>::from(meta.pre_token_balances)
                .map(normalize_token_balances),
            Option::<Vec<UiTransactionTokenBalance>>::from(meta.post_token_balances)
                .map(normalize_token_balances),
        ),
        None => (None, None),
    };

    TransactionDetail {
        signature: signature.to_string(),
        fee_payer,
        pre_token_balances,
        post_token_balances,
    }
}

fn normalize_token_balances(balances: Vec<UiTransactionTokenBalance>) -> Vec<TokenBalanceInfo> {
    balances
        .into_iter()
        .map(|balance| TokenBalanceInfo {
            mint: balance.mint,
            owner: Option::<String>::from(balance.owner),
            ui_amount: balance.ui_token_amount.ui_amount,
        })
        .collect()
}

/// First account key of the message, i.e. the fee-payer slot.
fn first_account_key(transaction: &EncodedTransaction) -> Option<String> {
    match transaction {
        EncodedTransaction::Json(ui_tx) => match &ui_tx.message {
            UiMessage::Raw(message) => message.account_keys.first().cloned(),
            UiMessage::Parsed(message) => {
                message.account_keys.first().map(|key| key.pubkey.clone())
            }
        },
        _ => None,
    }
}
