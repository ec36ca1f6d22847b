//! Ledger client for registering assets on chain.

mod http;
mod types;

pub use http::HttpLedgerClient;
pub use types::{LedgerError, MintReceipt, MintRequest};

use async_trait::async_trait;

/// Client for the ledger that records asset ownership.
///
/// Every submission carries an effect key; `find_mint` looks a previous
/// submission up by that key so an uncertain outcome can be reconciled
/// without minting twice.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Client name for logging and metrics.
    fn name(&self) -> &str;

    /// Submit a mint transaction and wait for its receipt.
    async fn submit_mint(&self, request: MintRequest) -> Result<MintReceipt, LedgerError>;

    /// Look up a confirmed mint by effect key.
    async fn find_mint(&self, effect_key: &str) -> Result<Option<MintReceipt>, LedgerError>;
}
