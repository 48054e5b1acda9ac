//! Cancellation and refunds.
//!
//! The organizer (or an admin) may cancel a draft or funding invoice.
//! Cancelling a funding invoice refunds every active contributor in full;
//! no withdrawal penalty applies because the contributors did not choose
//! to leave. Cancellation is terminal.

use crate::access;
use crate::state::StateManager;
use cotravel_common::{
    ContributionStatus, Error, FundingProgress, Invoice, InvoiceStatus, Result, Session, TxKind,
};
use tracing::info;

/// Cancellation operations
pub struct CancellationService {
    state: StateManager,
}

impl CancellationService {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    /// Cancel an invoice.
    ///
    /// Draft invoices have no escrow and cancel without a chain
    /// transaction. Funding invoices submit the organizer's signed cancel
    /// invocation, which refunds all contributors on-chain; the ledger
    /// mirrors that after confirmation.
    pub async fn cancel(
        &self,
        session: &Session,
        invoice_id: &str,
        envelope_xdr: Option<&str>,
    ) -> Result<Invoice> {
        let lock = self.state.invoice_lock(invoice_id);
        let _guard = lock.lock().await;

        let invoice = self
            .state
            .db()
            .get_invoice(invoice_id)?
            .ok_or_else(|| Error::invoice_not_found(invoice_id))?;
        access::require_organizer_or_admin(&invoice, session)?;

        match invoice.status {
            InvoiceStatus::Draft => {
                self.state
                    .db()
                    .update_invoice_status(invoice_id, InvoiceStatus::Cancelled)?;
                info!("Draft invoice {} cancelled", invoice_id);
            }
            InvoiceStatus::Funding => {
                let envelope = envelope_xdr.ok_or_else(|| {
                    Error::Validation(
                        "a signed cancel transaction is required for funding invoices".to_string(),
                    )
                })?;

                self.state
                    .run_chain_tx(
                        invoice_id,
                        &session.wallet_address,
                        TxKind::Cancel,
                        invoice.total_collected,
                        envelope,
                    )
                    .await?;

                for wallet in self.state.db().list_active_contributors(invoice_id)? {
                    self.state.db().close_contribution(
                        invoice_id,
                        &wallet,
                        ContributionStatus::Refunded,
                    )?;
                }
                self.state.db().update_invoice_collected(invoice_id, 0)?;
                self.state
                    .db()
                    .update_invoice_status(invoice_id, InvoiceStatus::Cancelled)?;
                // An open recipient-change proposal dies with the invoice
                if let Some(modification_id) =
                    self.state.db().open_modification_for_invoice(invoice_id)?
                {
                    self.state.db().delete_modification(&modification_id)?;
                }

                info!(
                    "Invoice {} cancelled, {} refunded in full",
                    invoice_id, invoice.total_collected
                );
            }
            status => {
                return Err(Error::InvalidStateTransition {
                    from: status.to_string(),
                    to: InvoiceStatus::Cancelled.to_string(),
                });
            }
        }

        let invoice = self
            .state
            .db()
            .get_invoice(invoice_id)?
            .ok_or_else(|| Error::invoice_not_found(invoice_id))?;
        self.state.publish_progress(FundingProgress {
            invoice_id: invoice_id.to_string(),
            total_required: invoice.total_required,
            total_collected: invoice.total_collected,
            status: invoice.status,
        });
        Ok(invoice)
    }
}
