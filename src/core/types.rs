use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transaction signature pulled off the log stream, waiting to be vetted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub signature: String,
}

impl Candidate {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
        }
    }
}

/// One token balance entry from a transaction's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalanceInfo {
    /// Token mint address
    pub mint: String,
    /// Owning wallet, when the RPC node reports it
    pub owner: Option<String>,
    /// Human-readable amount, when the RPC node reports it
    pub ui_amount: Option<f64>,
}

/// Normalized view of a confirmed transaction, as much of it as the
/// filter pipeline needs.
///
/// The token balance sections stay `Option` because RPC nodes omit them
/// for transactions that never touched token accounts; the pipeline
/// treats "absent" differently from "present but empty".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub signature: String,
    /// First account key of the transaction message (the fee-payer slot).
    pub fee_payer: Option<String>,
    pub pre_token_balances: Option<Vec<TokenBalanceInfo>>,
    pub post_token_balances: Option<Vec<TokenBalanceInfo>>,
}

/// One entry of a wallet's recent signature history, newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub signature: String,
    /// Unix timestamp of the containing block; null for very recent or
    /// pruned entries.
    pub block_time: Option<i64>,
}

/// A confirmed match: a fresh wallet's qualifying first interaction with
/// the tracked token. Immutable once appended to the store.
///
/// Field names on the wire are fixed by the query endpoint contract:
/// `wallet`, `signature`, `solBalance`, `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub wallet: String,
    pub signature: String,
    pub sol_balance: f64,
    /// Wall-clock time the pipeline completed, not chain time.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_serializes_with_wire_field_names() {
        let detection = Detection {
            wallet: "FvZ9Yx1PqWn5iM3kE7jTbA2cRdL8sGhQoN4uXw6pKmDe".to_string(),
            signature: "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW".to_string(),
            sol_balance: 0.05,
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&detection).unwrap();
        let obj = value.as_object().unwrap();

        assert!(obj.contains_key("wallet"));
        assert!(obj.contains_key("signature"));
        assert!(obj.contains_key("solBalance"));
        assert!(obj.contains_key("timestamp"));
        assert_eq!(obj.len(), 4);
        assert_eq!(obj["solBalance"].as_f64().unwrap(), 0.05);
    }
}
