//! Authorization checks and admin operations

use crate::state::StateManager;
use cotravel_common::{Error, Invoice, Result, Role, Session, User};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Only the invoice's organizer may proceed
pub fn require_organizer(invoice: &Invoice, wallet: &str) -> Result<()> {
    if invoice.organizer_wallet != wallet {
        return Err(Error::Authorization(
            "only the organizer may perform this action".to_string(),
        ));
    }
    Ok(())
}

/// The organizer or an admin may proceed
pub fn require_organizer_or_admin(invoice: &Invoice, session: &Session) -> Result<()> {
    if session.role == Role::Admin {
        return Ok(());
    }
    require_organizer(invoice, &session.wallet_address)
}

/// Admins only
pub fn require_admin(session: &Session) -> Result<()> {
    if session.role != Role::Admin {
        return Err(Error::Authorization("admin access required".to_string()));
    }
    Ok(())
}

/// The resource owner or an admin may proceed
pub fn require_owner_or_admin(owner_wallet: &str, session: &Session) -> Result<()> {
    if session.role == Role::Admin || session.wallet_address == owner_wallet {
        return Ok(());
    }
    Err(Error::Authorization(
        "only the owner may perform this action".to_string(),
    ))
}

/// Service-wide counters for the admin dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub users: u32,
    pub invoices: u32,
    pub transactions: u32,
    pub businesses: u32,
}

/// Admin operations
pub struct AdminService {
    state: StateManager,
}

impl AdminService {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    pub fn list_users(&self, session: &Session, offset: u32, limit: u32) -> Result<Vec<User>> {
        require_admin(session)?;
        self.state.db().list_users(offset, limit)
    }

    /// Change a wallet's role. An admin cannot demote itself, so the
    /// service always retains at least one admin.
    pub fn set_role(&self, session: &Session, wallet: &str, role: Role) -> Result<()> {
        require_admin(session)?;

        if wallet == session.wallet_address && role != Role::Admin {
            return Err(Error::Authorization(
                "admins cannot demote themselves".to_string(),
            ));
        }

        if !self.state.db().set_user_role(wallet, role)? {
            return Err(Error::NotFound {
                kind: "user".to_string(),
                id: wallet.to_string(),
            });
        }
        info!("Role of {} set to {}", wallet, role);
        Ok(())
    }

    pub fn stats(&self, session: &Session) -> Result<ServiceStats> {
        require_admin(session)?;
        Ok(ServiceStats {
            users: self.state.db().count_users()?,
            invoices: self.state.db().count_invoices()?,
            transactions: self.state.db().count_txs()?,
            businesses: self.state.db().count_businesses()?,
        })
    }
}
