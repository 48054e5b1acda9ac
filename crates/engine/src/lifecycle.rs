//! Invoice lifecycle: creation, chain linkage, release.
//!
//! Invoices start as off-chain drafts. Linking submits the organizer's
//! signed escrow-creation transaction and moves the invoice into funding;
//! a failed submission leaves it a draft. Release pays the line-item
//! recipients and is terminal.

use crate::access;
use crate::state::StateManager;
use cotravel_common::{
    crypto, Error, FundingProgress, Invoice, InvoiceStatus, LineItem, Result, Session, TxKind,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Parameters for a new invoice. Amounts are stroops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub name: String,
    pub description: Option<String>,
    /// Funding deadline, epoch seconds
    pub deadline: i64,
    pub penalty_percent: u32,
    pub auto_release: bool,
    pub items: Vec<LineItem>,
}

/// Invoice lifecycle operations
pub struct InvoiceService {
    state: StateManager,
}

impl InvoiceService {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    /// Validate line items and return their total
    pub(crate) fn validate_items(items: &[LineItem]) -> Result<i64> {
        if items.is_empty() {
            return Err(Error::Validation("at least one recipient required".to_string()));
        }
        let mut total: i64 = 0;
        for item in items {
            if item.description.trim().is_empty() {
                return Err(Error::Validation("item description required".to_string()));
            }
            if item.amount <= 0 {
                return Err(Error::Validation("item amounts must be positive".to_string()));
            }
            crypto::decode_account_id(&item.recipient_wallet)?;
            total = total
                .checked_add(item.amount)
                .ok_or_else(|| Error::Validation("invoice total overflows".to_string()))?;
        }
        Ok(total)
    }

    /// Create a draft invoice
    pub fn create(&self, session: &Session, new: NewInvoice) -> Result<Invoice> {
        if new.name.trim().is_empty() {
            return Err(Error::Validation("invoice name required".to_string()));
        }
        let now = chrono::Utc::now().timestamp();
        if new.deadline <= now {
            return Err(Error::Validation("deadline must be in the future".to_string()));
        }
        if new.penalty_percent > 100 {
            return Err(Error::Validation(
                "penalty percent must be at most 100".to_string(),
            ));
        }
        let total_required = Self::validate_items(&new.items)?;

        let invoice = Invoice {
            id: uuid::Uuid::new_v4().to_string(),
            organizer_wallet: session.wallet_address.clone(),
            name: new.name,
            description: new.description,
            deadline: new.deadline,
            penalty_percent: new.penalty_percent,
            auto_release: new.auto_release,
            status: InvoiceStatus::Draft,
            total_required,
            total_collected: 0,
            version: 1,
            contract_invoice_id: None,
            created_at: now,
            updated_at: now,
            items: new.items,
        };
        self.state.db().insert_invoice(&invoice)?;

        info!("Invoice {} created by {}", invoice.id, invoice.organizer_wallet);
        Ok(invoice)
    }

    pub fn get(&self, id: &str) -> Result<Invoice> {
        self.state
            .db()
            .get_invoice(id)?
            .ok_or_else(|| Error::invoice_not_found(id))
    }

    pub fn list(&self, offset: u32, limit: u32) -> Result<Vec<Invoice>> {
        self.state.db().list_invoices(offset, limit)
    }

    /// Invoices the wallet organizes or contributes to
    pub fn list_for_wallet(&self, wallet: &str) -> Result<Vec<Invoice>> {
        self.state.db().list_invoices_for_wallet(wallet)
    }

    /// Anchor a draft invoice in the escrow contract and open it for
    /// funding.
    ///
    /// The organizer signs the contract invocation in their wallet; the
    /// contract-side invoice id comes back from that invocation's
    /// simulation and is recorded here once the transaction confirms. A
    /// rejected or failed transaction leaves the invoice a draft.
    pub async fn link_on_chain(
        &self,
        session: &Session,
        invoice_id: &str,
        contract_invoice_id: i64,
        envelope_xdr: &str,
    ) -> Result<Invoice> {
        let lock = self.state.invoice_lock(invoice_id);
        let _guard = lock.lock().await;

        let invoice = self.get(invoice_id)?;
        access::require_organizer(&invoice, &session.wallet_address)?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(Error::InvalidStateTransition {
                from: invoice.status.to_string(),
                to: InvoiceStatus::Funding.to_string(),
            });
        }

        self.state
            .run_chain_tx(invoice_id, &session.wallet_address, TxKind::Link, 0, envelope_xdr)
            .await?;

        self.state.db().set_contract_invoice_id(invoice_id, contract_invoice_id)?;
        self.state
            .db()
            .update_invoice_status(invoice_id, InvoiceStatus::Funding)?;

        info!("Invoice {} linked on-chain as {}", invoice_id, contract_invoice_id);
        self.get(invoice_id)
    }

    /// Release a fully collected invoice to its recipients
    pub async fn release(
        &self,
        session: &Session,
        invoice_id: &str,
        envelope_xdr: &str,
    ) -> Result<Invoice> {
        let lock = self.state.invoice_lock(invoice_id);
        let _guard = lock.lock().await;

        let invoice = self.get(invoice_id)?;
        access::require_organizer(&invoice, &session.wallet_address)?;
        if invoice.status != InvoiceStatus::Funding {
            return Err(Error::InvalidStateTransition {
                from: invoice.status.to_string(),
                to: InvoiceStatus::Released.to_string(),
            });
        }
        if !invoice.is_fully_collected() {
            return Err(Error::Funding(
                "invoice is not fully collected".to_string(),
            ));
        }

        self.state
            .run_chain_tx(
                invoice_id,
                &session.wallet_address,
                TxKind::Release,
                invoice.total_collected,
                envelope_xdr,
            )
            .await?;

        self.state
            .db()
            .update_invoice_status(invoice_id, InvoiceStatus::Released)?;

        let invoice = self.get(invoice_id)?;
        self.state.publish_progress(FundingProgress {
            invoice_id: invoice_id.to_string(),
            total_required: invoice.total_required,
            total_collected: invoice.total_collected,
            status: invoice.status,
        });

        info!("Invoice {} released", invoice_id);
        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use crate::config::EngineConfig;
    use cotravel_common::crypto::WalletKeyPair;
    use cotravel_common::{Database, Role};
    use std::sync::Arc;

    fn service() -> (InvoiceService, Arc<MockChain>) {
        let db = Database::open_memory().unwrap();
        let chain = Arc::new(MockChain::new());
        let state = StateManager::with_parts(EngineConfig::default(), db, chain.clone());
        (InvoiceService::new(state), chain)
    }

    fn session(wallet: &str) -> Session {
        Session {
            wallet_address: wallet.to_string(),
            token: "tok".to_string(),
            issued_at: 0,
            expires_at: i64::MAX,
            role: Role::User,
        }
    }

    fn future_deadline() -> i64 {
        chrono::Utc::now().timestamp() + 86_400
    }

    fn line_item(amount: i64) -> LineItem {
        LineItem {
            description: "villa".to_string(),
            amount,
            recipient_wallet: WalletKeyPair::generate().account_id(),
        }
    }

    fn new_invoice(items: Vec<LineItem>) -> NewInvoice {
        NewInvoice {
            name: "Bali trip".to_string(),
            description: None,
            deadline: future_deadline(),
            penalty_percent: 15,
            auto_release: false,
            items,
        }
    }

    #[test]
    fn test_create_draft() {
        let (svc, _) = service();
        let invoice = svc
            .create(&session("GORG"), new_invoice(vec![line_item(100), line_item(250)]))
            .unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.total_required, 350);
        assert_eq!(invoice.total_collected, 0);
        assert!(invoice.contract_invoice_id.is_none());

        let fetched = svc.get(&invoice.id).unwrap();
        assert_eq!(fetched.items.len(), 2);
    }

    #[test]
    fn test_create_requires_recipients() {
        let (svc, _) = service();
        let err = svc.create(&session("GORG"), new_invoice(vec![])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: at least one recipient required"
        );
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let (svc, _) = service();

        let err = svc
            .create(&session("GORG"), new_invoice(vec![line_item(0)]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: item amounts must be positive");

        let mut past = new_invoice(vec![line_item(100)]);
        past.deadline = chrono::Utc::now().timestamp() - 10;
        let err = svc.create(&session("GORG"), past).unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: deadline must be in the future");

        let mut item = line_item(100);
        item.recipient_wallet = "garbage".to_string();
        assert!(svc.create(&session("GORG"), new_invoice(vec![item])).is_err());

        let mut steep = new_invoice(vec![line_item(100)]);
        steep.penalty_percent = 101;
        assert!(svc.create(&session("GORG"), steep).is_err());
    }

    #[tokio::test]
    async fn test_link_opens_funding() {
        let (svc, _) = service();
        let org = session("GORG");
        let invoice = svc.create(&org, new_invoice(vec![line_item(100)])).unwrap();

        let linked = svc.link_on_chain(&org, &invoice.id, 7, "signed-xdr").await.unwrap();
        assert_eq!(linked.status, InvoiceStatus::Funding);
        assert_eq!(linked.contract_invoice_id, Some(7));

        // second link attempt is a bad transition
        assert!(svc.link_on_chain(&org, &invoice.id, 8, "signed-xdr").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_link_leaves_draft() {
        let (svc, chain) = service();
        let org = session("GORG");
        let invoice = svc.create(&org, new_invoice(vec![line_item(100)])).unwrap();

        chain.fail_next_submit("tx_insufficient_fee");
        assert!(svc.link_on_chain(&org, &invoice.id, 7, "signed-xdr").await.is_err());

        let invoice = svc.get(&invoice.id).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert!(invoice.contract_invoice_id.is_none());
    }

    #[tokio::test]
    async fn test_only_organizer_links() {
        let (svc, _) = service();
        let invoice = svc
            .create(&session("GORG"), new_invoice(vec![line_item(100)]))
            .unwrap();

        let err = svc
            .link_on_chain(&session("GSTRANGER"), &invoice.id, 7, "xdr")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Authorization failed"));
    }

    #[tokio::test]
    async fn test_release_requires_full_collection() {
        let (svc, _) = service();
        let org = session("GORG");
        let invoice = svc.create(&org, new_invoice(vec![line_item(100)])).unwrap();
        svc.link_on_chain(&org, &invoice.id, 1, "xdr").await.unwrap();

        let err = svc.release(&org, &invoice.id, "xdr").await.unwrap_err();
        assert_eq!(err.to_string(), "Funding failed: invoice is not fully collected");

        svc.state.db().update_invoice_collected(&invoice.id, 100).unwrap();
        let released = svc.release(&org, &invoice.id, "xdr").await.unwrap();
        assert_eq!(released.status, InvoiceStatus::Released);

        // terminal
        assert!(svc.release(&org, &invoice.id, "xdr").await.is_err());
    }
}
