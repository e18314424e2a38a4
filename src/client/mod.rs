// Ledger lookup boundary
pub mod ledger;

pub use ledger::{LedgerClient, LedgerError, SolanaLedgerClient};
