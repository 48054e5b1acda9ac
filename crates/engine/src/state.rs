//! Shared state for the escrow engine

use crate::chain::{ChainClient, SorobanRpcClient, TxReceipt};
use crate::config::EngineConfig;
use cotravel_common::{Database, FundingProgress, Result, TxKind, TxRecord, TxStatus};
use dashmap::DashMap;
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

/// Shared state handed to every engine subsystem
#[derive(Clone)]
pub struct StateManager {
    config: EngineConfig,
    db: Database,
    chain: Arc<dyn ChainClient>,
    jwt_secret: Arc<String>,
    /// Per-invoice write locks. Contributions, withdrawals, and
    /// cancellations against one invoice serialize here.
    invoice_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    progress_tx: broadcast::Sender<FundingProgress>,
}

impl StateManager {
    /// Create a state manager backed by the real network
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let db = Database::open(config.db_path())?;
        let chain = Arc::new(SorobanRpcClient::new(config.network.clone()));
        Ok(Self::with_parts(config.clone(), db, chain))
    }

    /// Assemble from parts, used by tests to swap in a mock chain
    pub fn with_parts(config: EngineConfig, db: Database, chain: Arc<dyn ChainClient>) -> Self {
        let jwt_secret = config.auth.jwt_secret.clone().unwrap_or_else(|| {
            let mut bytes = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut bytes);
            info!("Generated ephemeral session signing secret");
            hex::encode(bytes)
        });

        let (progress_tx, _) = broadcast::channel(256);

        Self {
            config,
            db,
            chain,
            jwt_secret: Arc::new(jwt_secret),
            invoice_locks: Arc::new(DashMap::new()),
            progress_tx,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn chain(&self) -> &dyn ChainClient {
        self.chain.as_ref()
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    /// The write lock for one invoice. Locks are created on first touch and
    /// kept for the invoice's lifetime; entries are tiny.
    pub fn invoice_lock(&self, invoice_id: &str) -> Arc<Mutex<()>> {
        self.invoice_locks
            .entry(invoice_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Subscribe to funding-progress updates
    pub fn subscribe_progress(&self) -> broadcast::Receiver<FundingProgress> {
        self.progress_tx.subscribe()
    }

    /// Broadcast a funding-progress update. Lagging or absent receivers are
    /// fine.
    pub fn publish_progress(&self, progress: FundingProgress) {
        let _ = self.progress_tx.send(progress);
    }

    /// Submit a signed envelope, record it, and wait for confirmation.
    ///
    /// The pending row is written before polling so the audit trail shows
    /// in-flight transactions. State reconciliation happens only after this
    /// returns a receipt; a failed confirmation leaves ledger state
    /// untouched.
    pub async fn run_chain_tx(
        &self,
        invoice_id: &str,
        wallet: &str,
        kind: TxKind,
        amount: i64,
        envelope_xdr: &str,
    ) -> Result<TxReceipt> {
        let hash = self.chain.submit(envelope_xdr).await?;

        self.db.insert_tx(&TxRecord {
            hash: hash.clone(),
            invoice_id: invoice_id.to_string(),
            wallet: wallet.to_string(),
            kind,
            amount,
            ledger: None,
            status: TxStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
        })?;

        match self.chain.confirm(&hash).await {
            Ok(receipt) => {
                self.db
                    .update_tx_status(&hash, TxStatus::Confirmed, Some(receipt.ledger))?;
                Ok(receipt)
            }
            Err(e) => {
                warn!("Transaction {} did not confirm: {}", hash, e);
                self.db.update_tx_status(&hash, TxStatus::Failed, None)?;
                Err(e)
            }
        }
    }
}
