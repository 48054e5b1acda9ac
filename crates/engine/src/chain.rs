//! Stellar chain access.
//!
//! Clients sign transaction envelopes in their wallet; the engine only
//! submits signed XDR and waits for the network to confirm it. The trait
//! exists so the whole engine can run against [`MockChain`] in tests.

use crate::config::NetworkConfig;
use async_trait::async_trait;
use cotravel_common::{parse_xlm, Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Fee and minimum-balance headroom a wallet must hold beyond the amount it
/// sends, stroops.
pub const FEE_RESERVE_STROOPS: i64 = 10_000_000;

/// Outcome of a confirmed transaction
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub hash: String,
    pub ledger: u32,
}

/// Access to the Stellar network
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Native balance of an account, stroops
    async fn balance(&self, wallet: &str) -> Result<i64>;

    /// Submit a signed transaction envelope, returning its hash
    async fn submit(&self, envelope_xdr: &str) -> Result<String>;

    /// Wait until the network confirms (or rejects) a submitted transaction
    async fn confirm(&self, hash: &str) -> Result<TxReceipt>;
}

/// Soroban RPC client backed by reqwest
pub struct SorobanRpcClient {
    http: reqwest::Client,
    config: NetworkConfig,
}

impl SorobanRpcClient {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .http
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Chain(format!("rpc request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::Chain(format!("rpc response malformed: {}", e)))?;

        if let Some(err) = response.get("error") {
            return Err(Error::Chain(format!("rpc error: {}", err)));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Chain("rpc response missing result".to_string()))
    }
}

#[async_trait]
impl ChainClient for SorobanRpcClient {
    async fn balance(&self, wallet: &str) -> Result<i64> {
        let url = format!("{}/accounts/{}", self.config.horizon_url, wallet);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Chain(format!("horizon request failed: {}", e)))?;

        // Unfunded accounts do not exist on the ledger yet
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let account: Value = response
            .json()
            .await
            .map_err(|e| Error::Chain(format!("horizon response malformed: {}", e)))?;

        let balances = account
            .get("balances")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Chain("horizon account missing balances".to_string()))?;

        for entry in balances {
            if entry.get("asset_type").and_then(Value::as_str) == Some("native") {
                let amount = entry
                    .get("balance")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Chain("native balance missing".to_string()))?;
                return parse_xlm(amount);
            }
        }
        Ok(0)
    }

    async fn submit(&self, envelope_xdr: &str) -> Result<String> {
        let result = self
            .rpc("sendTransaction", json!({ "transaction": envelope_xdr }))
            .await?;

        let status = result.get("status").and_then(Value::as_str).unwrap_or("");
        if status == "ERROR" {
            let detail = result
                .get("errorResultXdr")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(Error::Chain(format!("transaction rejected: {}", detail)));
        }

        let hash = result
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Chain("sendTransaction returned no hash".to_string()))?;
        debug!("Submitted transaction {}", hash);
        Ok(hash.to_string())
    }

    async fn confirm(&self, hash: &str) -> Result<TxReceipt> {
        let interval = std::time::Duration::from_millis(self.config.confirm_interval_ms);

        for attempt in 0..self.config.confirm_attempts {
            let result = self.rpc("getTransaction", json!({ "hash": hash })).await?;
            let status = result.get("status").and_then(Value::as_str).unwrap_or("");

            match status {
                "SUCCESS" => {
                    let ledger = result.get("ledger").and_then(Value::as_u64).unwrap_or(0) as u32;
                    debug!("Transaction {} confirmed in ledger {}", hash, ledger);
                    return Ok(TxReceipt {
                        hash: hash.to_string(),
                        ledger,
                    });
                }
                "FAILED" => {
                    warn!("Transaction {} failed on-chain", hash);
                    return Err(Error::Chain(format!("transaction {} failed", hash)));
                }
                // NOT_FOUND until the network includes it
                _ => {
                    debug!("Transaction {} not yet confirmed (attempt {})", hash, attempt + 1);
                    tokio::time::sleep(interval).await;
                }
            }
        }

        Err(Error::Timeout {
            seconds: self.config.confirm_attempts as u64 * self.config.confirm_interval_ms / 1000,
        })
    }
}

/// In-process chain for tests. Confirms every submission immediately unless
/// a failure is injected.
#[derive(Default)]
pub struct MockChain {
    balances: parking_lot::Mutex<HashMap<String, i64>>,
    fail_next_submit: parking_lot::Mutex<Option<String>>,
    fail_next_confirm: parking_lot::Mutex<Option<String>>,
    next_ledger: AtomicU32,
    submissions: AtomicU32,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            next_ledger: AtomicU32::new(100),
            ..Default::default()
        }
    }

    pub fn set_balance(&self, wallet: &str, stroops: i64) {
        self.balances.lock().insert(wallet.to_string(), stroops);
    }

    /// Make the next submit fail with the given reason
    pub fn fail_next_submit(&self, reason: &str) {
        *self.fail_next_submit.lock() = Some(reason.to_string());
    }

    /// Make the next confirmation report an on-chain failure
    pub fn fail_next_confirm(&self, reason: &str) {
        *self.fail_next_confirm.lock() = Some(reason.to_string());
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn balance(&self, wallet: &str) -> Result<i64> {
        Ok(self.balances.lock().get(wallet).copied().unwrap_or(0))
    }

    async fn submit(&self, envelope_xdr: &str) -> Result<String> {
        if let Some(reason) = self.fail_next_submit.lock().take() {
            return Err(Error::Chain(format!("transaction rejected: {}", reason)));
        }
        use sha2::{Digest, Sha256};
        let seq = self.submissions.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(envelope_xdr.as_bytes());
        hasher.update(seq.to_be_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    async fn confirm(&self, hash: &str) -> Result<TxReceipt> {
        if let Some(reason) = self.fail_next_confirm.lock().take() {
            return Err(Error::Chain(format!("transaction {} failed: {}", hash, reason)));
        }
        let ledger = self.next_ledger.fetch_add(1, Ordering::SeqCst);
        Ok(TxReceipt {
            hash: hash.to_string(),
            ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_chain_confirms_submissions() {
        let chain = MockChain::new();
        chain.set_balance("GABC", 500);
        assert_eq!(chain.balance("GABC").await.unwrap(), 500);
        assert_eq!(chain.balance("GUNKNOWN").await.unwrap(), 0);

        let hash = chain.submit("xdr-blob").await.unwrap();
        let receipt = chain.confirm(&hash).await.unwrap();
        assert_eq!(receipt.hash, hash);
        assert!(receipt.ledger >= 100);
    }

    #[tokio::test]
    async fn test_mock_chain_failure_injection() {
        let chain = MockChain::new();

        chain.fail_next_submit("tx_bad_seq");
        assert!(chain.submit("xdr").await.is_err());
        // one-shot
        assert!(chain.submit("xdr").await.is_ok());

        chain.fail_next_confirm("contract trapped");
        let hash = chain.submit("xdr").await.unwrap();
        assert!(chain.confirm(&hash).await.is_err());
    }
}
