//! Recipient changes with contributor re-consent.
//!
//! Once an invoice is funding, the organizer cannot silently change where
//! the money goes. An item change is proposed as a modification, every
//! active contributor must consent, and only then may the organizer apply
//! it on-chain. A contributor who disagrees opts out and is refunded in
//! full, penalty-free.

use crate::access;
use crate::lifecycle::InvoiceService;
use crate::state::StateManager;
use cotravel_common::{
    ContributionStatus, Error, FundingProgress, Invoice, InvoiceStatus, LineItem, Modification,
    Result, Session, TxKind,
};
use tracing::info;

/// Modification operations
pub struct ModificationService {
    state: StateManager,
}

impl ModificationService {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    fn get_invoice(&self, id: &str) -> Result<Invoice> {
        self.state
            .db()
            .get_invoice(id)?
            .ok_or_else(|| Error::invoice_not_found(id))
    }

    /// Modifications only exist on funding invoices. A proposal left open
    /// past a terminal transition is inert.
    fn funding_invoice(&self, id: &str) -> Result<Invoice> {
        let invoice = self.get_invoice(id)?;
        if invoice.status != InvoiceStatus::Funding {
            return Err(Error::Validation(
                "only funding invoices can be modified".to_string(),
            ));
        }
        Ok(invoice)
    }

    fn open_modification(&self, invoice_id: &str) -> Result<Option<Modification>> {
        match self.state.db().open_modification_for_invoice(invoice_id)? {
            Some(id) => self.state.db().get_modification(&id),
            None => Ok(None),
        }
    }

    /// Propose new line items for a funding invoice
    pub async fn propose(
        &self,
        session: &Session,
        invoice_id: &str,
        summary: String,
        items: Vec<LineItem>,
    ) -> Result<Modification> {
        let lock = self.state.invoice_lock(invoice_id);
        let _guard = lock.lock().await;

        let invoice = self.funding_invoice(invoice_id)?;
        access::require_organizer(&invoice, &session.wallet_address)?;
        if self.open_modification(invoice_id)?.is_some() {
            return Err(Error::Validation(
                "a modification is already awaiting consent".to_string(),
            ));
        }
        let new_total = InvoiceService::validate_items(&items)?;
        if new_total < invoice.total_collected {
            return Err(Error::Validation(
                "new total is below the amount already collected".to_string(),
            ));
        }

        let modification = Modification {
            id: uuid::Uuid::new_v4().to_string(),
            invoice_id: invoice_id.to_string(),
            version: invoice.version,
            summary,
            items,
            consented: Vec::new(),
            created_at: chrono::Utc::now().timestamp(),
        };
        self.state.db().insert_modification(&modification)?;

        info!("Modification {} proposed for invoice {}", modification.id, invoice_id);
        Ok(modification)
    }

    /// Record an active contributor's consent
    pub async fn consent(&self, session: &Session, invoice_id: &str) -> Result<Modification> {
        let lock = self.state.invoice_lock(invoice_id);
        let _guard = lock.lock().await;

        self.funding_invoice(invoice_id)?;
        let modification = self
            .open_modification(invoice_id)?
            .ok_or_else(|| Error::Validation("no modification awaiting consent".to_string()))?;

        let active = self.state.db().list_active_contributors(invoice_id)?;
        if !active.contains(&session.wallet_address) {
            return Err(Error::Authorization(
                "only active contributors may consent".to_string(),
            ));
        }

        self.state
            .db()
            .add_modification_consent(&modification.id, &session.wallet_address)?;

        let modification = self
            .state
            .db()
            .get_modification(&modification.id)?
            .ok_or_else(|| Error::Internal("modification vanished mid-consent".to_string()))?;
        info!(
            "{} consented to modification {} ({}/{})",
            session.wallet_address,
            modification.id,
            modification.consented.len(),
            active.len()
        );
        Ok(modification)
    }

    /// Apply a unanimously consented modification on-chain.
    ///
    /// Contributors who opted out since the proposal no longer count toward
    /// unanimity.
    pub async fn apply(
        &self,
        session: &Session,
        invoice_id: &str,
        envelope_xdr: &str,
    ) -> Result<Invoice> {
        let lock = self.state.invoice_lock(invoice_id);
        let _guard = lock.lock().await;

        let invoice = self.funding_invoice(invoice_id)?;
        access::require_organizer(&invoice, &session.wallet_address)?;
        let modification = self
            .open_modification(invoice_id)?
            .ok_or_else(|| Error::Validation("no modification awaiting consent".to_string()))?;

        let active = self.state.db().list_active_contributors(invoice_id)?;
        if active.iter().any(|w| !modification.consented.contains(w)) {
            return Err(Error::Validation(
                "not all active contributors have consented".to_string(),
            ));
        }

        let new_total = InvoiceService::validate_items(&modification.items)?;
        if new_total < invoice.total_collected {
            return Err(Error::Validation(
                "new total is below the amount already collected".to_string(),
            ));
        }

        self.state
            .run_chain_tx(
                invoice_id,
                &session.wallet_address,
                TxKind::UpdateRecipients,
                0,
                envelope_xdr,
            )
            .await?;

        let version =
            self.state
                .db()
                .replace_invoice_items(invoice_id, &modification.items, new_total)?;
        self.state.db().delete_modification(&modification.id)?;

        let invoice = self.get_invoice(invoice_id)?;
        self.state.publish_progress(FundingProgress {
            invoice_id: invoice_id.to_string(),
            total_required: invoice.total_required,
            total_collected: invoice.total_collected,
            status: invoice.status,
        });

        info!("Invoice {} items updated to version {}", invoice_id, version);
        Ok(invoice)
    }

    /// Withdraw the proposal
    pub async fn retract(&self, session: &Session, invoice_id: &str) -> Result<()> {
        let lock = self.state.invoice_lock(invoice_id);
        let _guard = lock.lock().await;

        let invoice = self.get_invoice(invoice_id)?;
        access::require_organizer(&invoice, &session.wallet_address)?;
        let modification = self
            .open_modification(invoice_id)?
            .ok_or_else(|| Error::Validation("no modification awaiting consent".to_string()))?;

        self.state.db().delete_modification(&modification.id)?;
        info!("Modification {} retracted", modification.id);
        Ok(())
    }

    /// Leave the invoice instead of consenting. The full stake comes back;
    /// the withdrawal penalty does not apply to a contributor pushed out by
    /// a proposed change.
    pub async fn opt_out(
        &self,
        session: &Session,
        invoice_id: &str,
        envelope_xdr: &str,
    ) -> Result<Invoice> {
        let lock = self.state.invoice_lock(invoice_id);
        let _guard = lock.lock().await;

        let invoice = self.funding_invoice(invoice_id)?;
        self.open_modification(invoice_id)?
            .ok_or_else(|| Error::Validation("no modification awaiting consent".to_string()))?;

        let contribution = self
            .state
            .db()
            .get_contribution(invoice_id, &session.wallet_address)?
            .filter(|c| c.status == ContributionStatus::Active && c.amount > 0)
            .ok_or_else(|| Error::Funding("no active contribution to withdraw".to_string()))?;

        self.state
            .run_chain_tx(
                invoice_id,
                &session.wallet_address,
                TxKind::Withdraw,
                contribution.amount,
                envelope_xdr,
            )
            .await?;

        self.state.db().close_contribution(
            invoice_id,
            &session.wallet_address,
            ContributionStatus::Refunded,
        )?;
        let collected = invoice.total_collected - contribution.amount;
        self.state.db().update_invoice_collected(invoice_id, collected)?;

        let invoice = self.get_invoice(invoice_id)?;
        self.state.publish_progress(FundingProgress {
            invoice_id: invoice_id.to_string(),
            total_required: invoice.total_required,
            total_collected: invoice.total_collected,
            status: invoice.status,
        });

        info!(
            "{} opted out of invoice {} with a full {} refund",
            session.wallet_address, invoice_id, contribution.amount
        );
        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationService;
    use crate::chain::MockChain;
    use crate::config::EngineConfig;
    use crate::ledger::LedgerService;
    use crate::lifecycle::NewInvoice;
    use cotravel_common::crypto::WalletKeyPair;
    use cotravel_common::{Database, Role};
    use std::sync::Arc;

    struct Fixture {
        mods: ModificationService,
        ledger: LedgerService,
        invoices: InvoiceService,
        cancels: CancellationService,
        chain: Arc<MockChain>,
    }

    fn fixture() -> Fixture {
        let db = Database::open_memory().unwrap();
        let chain = Arc::new(MockChain::new());
        let state = StateManager::with_parts(EngineConfig::default(), db, chain.clone());
        Fixture {
            mods: ModificationService::new(state.clone()),
            ledger: LedgerService::new(state.clone()),
            invoices: InvoiceService::new(state.clone()),
            cancels: CancellationService::new(state),
            chain,
        }
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

    fn item(amount: i64) -> LineItem {
        LineItem {
            description: "villa".to_string(),
            amount,
            recipient_wallet: WalletKeyPair::generate().account_id(),
        }
    }

    async fn funding_invoice(f: &Fixture, total: i64) -> String {
        let org = session("GORG");
        let invoice = f
            .invoices
            .create(
                &org,
                NewInvoice {
                    name: "trip".to_string(),
                    description: None,
                    deadline: chrono::Utc::now().timestamp() + 86_400,
                    penalty_percent: 15,
                    auto_release: false,
                    items: vec![item(total)],
                },
            )
            .unwrap();
        f.invoices.link_on_chain(&org, &invoice.id, 1, "xdr").await.unwrap();
        invoice.id
    }

    #[tokio::test]
    async fn test_unanimous_consent_applies_change() {
        let f = fixture();
        let org = session("GORG");
        let id = funding_invoice(&f, 1000).await;
        f.chain.set_balance("GA", 1_000_000_000);
        f.chain.set_balance("GB", 1_000_000_000);
        f.ledger.contribute(&session("GA"), &id, 300, "xdr").await.unwrap();
        f.ledger.contribute(&session("GB"), &id, 200, "xdr").await.unwrap();

        f.mods
            .propose(&org, &id, "swap villa".to_string(), vec![item(1200)])
            .await
            .unwrap();

        // not unanimous yet
        f.mods.consent(&session("GA"), &id).await.unwrap();
        let err = f.mods.apply(&org, &id, "xdr").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: not all active contributors have consented"
        );

        f.mods.consent(&session("GB"), &id).await.unwrap();
        let invoice = f.mods.apply(&org, &id, "xdr").await.unwrap();
        assert_eq!(invoice.total_required, 1200);
        assert_eq!(invoice.version, 2);
        assert_eq!(invoice.total_collected, 500);
    }

    #[tokio::test]
    async fn test_only_contributors_consent() {
        let f = fixture();
        let org = session("GORG");
        let id = funding_invoice(&f, 1000).await;
        f.chain.set_balance("GA", 1_000_000_000);
        f.ledger.contribute(&session("GA"), &id, 300, "xdr").await.unwrap();

        f.mods
            .propose(&org, &id, "swap".to_string(), vec![item(1500)])
            .await
            .unwrap();

        let err = f.mods.consent(&session("GSTRANGER"), &id).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Authorization failed: only active contributors may consent"
        );
    }

    #[tokio::test]
    async fn test_one_open_modification_at_a_time() {
        let f = fixture();
        let org = session("GORG");
        let id = funding_invoice(&f, 1000).await;

        f.mods
            .propose(&org, &id, "first".to_string(), vec![item(1100)])
            .await
            .unwrap();
        let err = f
            .mods
            .propose(&org, &id, "second".to_string(), vec![item(1200)])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: a modification is already awaiting consent"
        );

        f.mods.retract(&org, &id).await.unwrap();
        f.mods
            .propose(&org, &id, "second".to_string(), vec![item(1200)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cannot_shrink_below_collected() {
        let f = fixture();
        let org = session("GORG");
        let id = funding_invoice(&f, 1000).await;
        f.chain.set_balance("GA", 1_000_000_000);
        f.ledger.contribute(&session("GA"), &id, 800, "xdr").await.unwrap();

        let err = f
            .mods
            .propose(&org, &id, "shrink".to_string(), vec![item(500)])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: new total is below the amount already collected"
        );
    }

    #[tokio::test]
    async fn test_opt_out_refunds_in_full_without_penalty() {
        let f = fixture();
        let org = session("GORG");
        let id = funding_invoice(&f, 1000).await;
        f.chain.set_balance("GA", 1_000_000_000);
        f.chain.set_balance("GB", 1_000_000_000);
        f.ledger.contribute(&session("GA"), &id, 300, "xdr").await.unwrap();
        f.ledger.contribute(&session("GB"), &id, 200, "xdr").await.unwrap();

        f.mods
            .propose(&org, &id, "swap".to_string(), vec![item(1100)])
            .await
            .unwrap();

        let invoice = f.mods.opt_out(&session("GA"), &id, "xdr").await.unwrap();
        assert_eq!(invoice.total_collected, 200);
        let c = f.ledger.contribution(&id, "GA").unwrap().unwrap();
        assert_eq!(c.amount, 0);
        assert_eq!(c.status, ContributionStatus::Refunded);

        // GA no longer counts toward unanimity
        f.mods.consent(&session("GB"), &id).await.unwrap();
        let invoice = f.mods.apply(&org, &id, "xdr").await.unwrap();
        assert_eq!(invoice.total_required, 1100);
    }

    #[tokio::test]
    async fn test_opt_out_requires_open_modification() {
        let f = fixture();
        let id = funding_invoice(&f, 1000).await;
        f.chain.set_balance("GA", 1_000_000_000);
        f.ledger.contribute(&session("GA"), &id, 300, "xdr").await.unwrap();

        assert!(f.mods.opt_out(&session("GA"), &id, "xdr").await.is_err());
    }

    #[tokio::test]
    async fn test_apply_with_no_contributors() {
        let f = fixture();
        let org = session("GORG");
        let id = funding_invoice(&f, 1000).await;

        f.mods
            .propose(&org, &id, "swap".to_string(), vec![item(900)])
            .await
            .unwrap();
        // nobody has to consent when nobody has contributed
        let invoice = f.mods.apply(&org, &id, "xdr").await.unwrap();
        assert_eq!(invoice.total_required, 900);
    }

    #[tokio::test]
    async fn test_cancellation_kills_open_modification() {
        let f = fixture();
        let org = session("GORG");
        let id = funding_invoice(&f, 1000).await;
        f.chain.set_balance("GA", 1_000_000_000);
        f.ledger.contribute(&session("GA"), &id, 300, "xdr").await.unwrap();

        f.mods
            .propose(&org, &id, "swap".to_string(), vec![item(1200)])
            .await
            .unwrap();
        let cancelled = f.cancels.cancel(&org, &id, Some("xdr")).await.unwrap();
        assert_eq!(cancelled.status, InvoiceStatus::Cancelled);

        // the proposal died with the invoice, and terminal invoices take
        // no consent traffic at all
        let err = f.mods.apply(&org, &id, "xdr").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: only funding invoices can be modified"
        );
        assert!(f.mods.consent(&session("GA"), &id).await.is_err());
        assert!(f.mods.opt_out(&session("GA"), &id, "xdr").await.is_err());

        let invoice = f.invoices.get(&id).unwrap();
        assert_eq!(invoice.total_required, 1000);
        assert_eq!(invoice.version, 1);
    }
}
