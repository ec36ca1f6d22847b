//! Mock ledger for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::ledger::{LedgerClient, LedgerError, MintReceipt, MintRequest};

#[derive(Debug, Default)]
struct LedgerState {
    /// Every submit_mint call, including failed ones.
    submissions: Vec<MintRequest>,
    /// Mints that actually happened, by effect key.
    mints: Vec<(String, MintReceipt)>,
    errors: VecDeque<LedgerError>,
    lost_responses: u32,
    finds: usize,
    next_token: u64,
    delay: Duration,
}

/// Mock implementation of the LedgerClient trait.
///
/// Tokens are numbered from 42. Unlike a well-behaved ledger the mock never
/// deduplicates by effect key, so a double submission shows up as two mints.
///
/// Scripting:
/// - `push_error` fails the next submission before anything is minted.
/// - `lose_next_responses` mints but then reports a timeout, which is the
///   ambiguous case the idempotency guard has to resolve.
#[derive(Debug, Clone)]
pub struct MockLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState {
                next_token: 42,
                ..Default::default()
            })),
        }
    }

    /// Fail the next submission with `error`.
    pub async fn push_error(&self, error: LedgerError) {
        self.state.write().await.errors.push_back(error);
    }

    /// Mint, then lose the response, for the next `count` submissions.
    pub async fn lose_next_responses(&self, count: u32) {
        self.state.write().await.lost_responses = count;
    }

    /// Simulated confirmation time.
    pub async fn set_delay(&self, delay: Duration) {
        self.state.write().await.delay = delay;
    }

    /// Every submission received, including failed ones.
    pub async fn submissions(&self) -> Vec<MintRequest> {
        self.state.read().await.submissions.clone()
    }

    /// Number of tokens actually minted.
    pub async fn mint_count(&self) -> usize {
        self.state.read().await.mints.len()
    }

    pub async fn find_count(&self) -> usize {
        self.state.read().await.finds
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit_mint(&self, request: MintRequest) -> Result<MintReceipt, LedgerError> {
        let delay = {
            let mut state = self.state.write().await;
            state.submissions.push(request.clone());
            if let Some(err) = state.errors.pop_front() {
                return Err(err);
            }
            state.delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        let token = state.next_token;
        state.next_token += 1;
        let receipt = MintReceipt {
            asset_token_id: token.to_string(),
            tx_receipt: format!("0xtx{:04}", token),
        };
        state.mints.push((request.effect_key, receipt.clone()));

        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(LedgerError::Timeout);
        }
        Ok(receipt)
    }

    async fn find_mint(&self, effect_key: &str) -> Result<Option<MintReceipt>, LedgerError> {
        let mut state = self.state.write().await;
        state.finds += 1;
        Ok(state
            .mints
            .iter()
            .find(|(key, _)| key == effect_key)
            .map(|(_, receipt)| receipt.clone()))
    }
}
