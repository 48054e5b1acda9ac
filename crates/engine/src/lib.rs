//! CoTravel escrow engine.
//!
//! Invoice lifecycle, contribution ledger, withdrawal and cancellation
//! processing, wallet authentication, and chain access. The HTTP layer in
//! `cotravel-api` is a thin shell over this crate.

pub mod access;
pub mod auth;
pub mod business;
pub mod cancellation;
pub mod chain;
pub mod config;
pub mod consent;
pub mod ledger;
pub mod lifecycle;
pub mod state;
pub mod withdrawal;

pub use config::EngineConfig;
pub use state::StateManager;

use std::sync::Arc;

/// All engine services over one shared state
pub struct Engine {
    pub state: StateManager,
    pub auth: auth::AuthService,
    pub invoices: lifecycle::InvoiceService,
    pub ledger: ledger::LedgerService,
    pub withdrawals: withdrawal::WithdrawalService,
    pub cancellations: cancellation::CancellationService,
    pub modifications: consent::ModificationService,
    pub businesses: business::BusinessService,
    pub admin: access::AdminService,
}

impl Engine {
    pub fn new(state: StateManager) -> Self {
        Self {
            auth: auth::AuthService::new(state.clone()),
            invoices: lifecycle::InvoiceService::new(state.clone()),
            ledger: ledger::LedgerService::new(state.clone()),
            withdrawals: withdrawal::WithdrawalService::new(state.clone()),
            cancellations: cancellation::CancellationService::new(state.clone()),
            modifications: consent::ModificationService::new(state.clone()),
            businesses: business::BusinessService::new(state.clone()),
            admin: access::AdminService::new(state.clone()),
            state,
        }
    }

    /// Engine against the real network per config
    pub fn open(config: &EngineConfig) -> cotravel_common::Result<Self> {
        Ok(Self::new(StateManager::new(config)?))
    }

    /// Engine over an in-memory database and mock chain, for tests
    pub fn in_memory() -> cotravel_common::Result<Arc<Self>> {
        let db = cotravel_common::Database::open_memory()?;
        let chain = Arc::new(chain::MockChain::new());
        let state = StateManager::with_parts(EngineConfig::default(), db, chain);
        Ok(Arc::new(Self::new(state)))
    }
}
