//! Early withdrawal.
//!
//! A contributor may pull out of a funding invoice before it releases. The
//! escrow keeps a percentage of the stake as a penalty and refunds the
//! rest; the full stake leaves the collected total, reopening that part of
//! the invoice for others.

use crate::state::StateManager;
use cotravel_common::{
    amount::penalty_for, ContributionStatus, Error, FundingProgress, InvoiceStatus, Result,
    Session, TxKind,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Outcome of a withdrawal, stroops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalOutcome {
    pub invoice_id: String,
    /// Stake removed from the invoice
    pub withdrawn: i64,
    /// Penalty kept by the escrow
    pub penalty: i64,
    /// Amount returned to the contributor
    pub refunded: i64,
}

/// Withdrawal operations
pub struct WithdrawalService {
    state: StateManager,
}

impl WithdrawalService {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    /// Quote the penalty and refund for a wallet's current stake without
    /// touching anything
    pub fn quote(&self, invoice_id: &str, wallet: &str) -> Result<WithdrawalOutcome> {
        let invoice = self
            .state
            .db()
            .get_invoice(invoice_id)?
            .ok_or_else(|| Error::invoice_not_found(invoice_id))?;
        let contribution = self.state.db().get_contribution(invoice_id, wallet)?;

        let stake = contribution
            .filter(|c| c.status == ContributionStatus::Active)
            .map(|c| c.amount)
            .unwrap_or(0);
        let penalty = penalty_for(stake, invoice.penalty_percent);
        Ok(WithdrawalOutcome {
            invoice_id: invoice_id.to_string(),
            withdrawn: stake,
            penalty,
            refunded: stake - penalty,
        })
    }

    /// Withdraw the caller's full stake from a funding invoice
    pub async fn withdraw(
        &self,
        session: &Session,
        invoice_id: &str,
        envelope_xdr: &str,
    ) -> Result<WithdrawalOutcome> {
        let lock = self.state.invoice_lock(invoice_id);
        let _guard = lock.lock().await;

        let invoice = self
            .state
            .db()
            .get_invoice(invoice_id)?
            .ok_or_else(|| Error::invoice_not_found(invoice_id))?;
        if invoice.status != InvoiceStatus::Funding {
            return Err(Error::Funding(
                "withdrawals are only possible while funding".to_string(),
            ));
        }

        let contribution = self
            .state
            .db()
            .get_contribution(invoice_id, &session.wallet_address)?
            .filter(|c| c.status == ContributionStatus::Active && c.amount > 0)
            .ok_or_else(|| Error::Funding("no active contribution to withdraw".to_string()))?;

        let stake = contribution.amount;
        let penalty = penalty_for(stake, invoice.penalty_percent);
        let refunded = stake - penalty;

        self.state
            .run_chain_tx(invoice_id, &session.wallet_address, TxKind::Withdraw, stake, envelope_xdr)
            .await?;

        self.state.db().close_contribution(
            invoice_id,
            &session.wallet_address,
            ContributionStatus::Withdrawn,
        )?;
        // the full stake leaves the pot, not just the refunded part
        let collected = invoice.total_collected - stake;
        self.state.db().update_invoice_collected(invoice_id, collected)?;

        self.state.publish_progress(FundingProgress {
            invoice_id: invoice_id.to_string(),
            total_required: invoice.total_required,
            total_collected: collected,
            status: invoice.status,
        });

        info!(
            "{} withdrew {} from invoice {} (penalty {}, refunded {})",
            session.wallet_address, stake, invoice_id, penalty, refunded
        );
        Ok(WithdrawalOutcome {
            invoice_id: invoice_id.to_string(),
            withdrawn: stake,
            penalty,
            refunded,
        })
    }
}
