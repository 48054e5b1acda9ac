//! Contribution ledger.
//!
//! All funding-state writes for one invoice run under that invoice's lock,
//! so the no-overfund invariant holds even with concurrent contributors.
//! Ledger state moves only after the chain confirms the transfer.

use crate::chain::FEE_RESERVE_STROOPS;
use crate::state::StateManager;
use cotravel_common::{
    Contribution, Error, FundingProgress, Invoice, InvoiceStatus, Result, Session, TxKind,
};
use tracing::info;

/// Contribution operations
pub struct LedgerService {
    state: StateManager,
}

impl LedgerService {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    fn get_invoice(&self, id: &str) -> Result<Invoice> {
        self.state
            .db()
            .get_invoice(id)?
            .ok_or_else(|| Error::invoice_not_found(id))
    }

    fn publish(&self, invoice: &Invoice) {
        self.state.publish_progress(FundingProgress {
            invoice_id: invoice.id.clone(),
            total_required: invoice.total_required,
            total_collected: invoice.total_collected,
            status: invoice.status,
        });
    }

    /// Contribute to a funding invoice.
    ///
    /// The contribution must fit in the unpaid remainder exactly or below;
    /// partial acceptance does not exist. The contributor's wallet must
    /// cover the amount plus fee headroom before the transfer is submitted.
    pub async fn contribute(
        &self,
        session: &Session,
        invoice_id: &str,
        amount: i64,
        envelope_xdr: &str,
    ) -> Result<Invoice> {
        let lock = self.state.invoice_lock(invoice_id);
        let _guard = lock.lock().await;

        let invoice = self.get_invoice(invoice_id)?;
        if invoice.status != InvoiceStatus::Funding {
            return Err(Error::Funding(
                "invoice is not accepting contributions".to_string(),
            ));
        }
        if chrono::Utc::now().timestamp() >= invoice.deadline {
            return Err(Error::Funding("funding deadline has passed".to_string()));
        }
        if amount <= 0 {
            return Err(Error::Funding("contribution must be positive".to_string()));
        }
        if amount > invoice.remaining() {
            return Err(Error::Funding(
                "amount exceeds remaining unpaid amount".to_string(),
            ));
        }

        let balance = self.state.chain().balance(&session.wallet_address).await?;
        if balance < amount + FEE_RESERVE_STROOPS {
            return Err(Error::Funding(
                "insufficient funds to cover contribution and fees".to_string(),
            ));
        }

        self.state
            .run_chain_tx(
                invoice_id,
                &session.wallet_address,
                TxKind::Contribute,
                amount,
                envelope_xdr,
            )
            .await?;

        self.state
            .db()
            .upsert_contribution(invoice_id, &session.wallet_address, amount)?;
        let collected = invoice.total_collected + amount;
        self.state.db().update_invoice_collected(invoice_id, collected)?;

        // the contract releases within the same contribution call when the
        // invoice completes with auto-release set
        if collected == invoice.total_required && invoice.auto_release {
            self.state
                .db()
                .update_invoice_status(invoice_id, InvoiceStatus::Released)?;
            info!("Invoice {} fully collected and auto-released", invoice_id);
        }

        let invoice = self.get_invoice(invoice_id)?;
        self.publish(&invoice);
        info!(
            "{} contributed {} to invoice {} ({}/{})",
            session.wallet_address, amount, invoice_id, invoice.total_collected, invoice.total_required
        );
        Ok(invoice)
    }

    /// A wallet's stake in an invoice
    pub fn contribution(&self, invoice_id: &str, wallet: &str) -> Result<Option<Contribution>> {
        self.state.db().get_contribution(invoice_id, wallet)
    }

    /// All participants of an invoice
    pub fn participants(&self, invoice_id: &str) -> Result<Vec<Contribution>> {
        self.get_invoice(invoice_id)?;
        self.state.db().list_contributions(invoice_id)
    }
}
