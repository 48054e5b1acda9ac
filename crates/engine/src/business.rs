//! Business directory.
//!
//! A small registry of travel businesses that can appear as invoice
//! recipients. Listings are public; writes belong to the owner or an
//! admin.

use crate::access;
use crate::state::StateManager;
use cotravel_common::{Business, Error, Result, Session};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Parameters for creating or updating a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessDetails {
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
}

/// A page of listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessPage {
    pub businesses: Vec<Business>,
    pub total: u32,
    pub offset: u32,
}

/// Business directory operations
pub struct BusinessService {
    state: StateManager,
}

impl BusinessService {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    pub fn create(&self, session: &Session, details: BusinessDetails) -> Result<Business> {
        if details.name.trim().is_empty() {
            return Err(Error::Validation("business name required".to_string()));
        }

        let now = chrono::Utc::now().timestamp();
        let business = Business {
            id: uuid::Uuid::new_v4().to_string(),
            owner_wallet: session.wallet_address.clone(),
            name: details.name,
            category: details.category,
            description: details.description,
            contact_email: details.contact_email,
            created_at: now,
            updated_at: now,
        };
        self.state.db().insert_business(&business)?;

        info!("Business {} listed by {}", business.id, business.owner_wallet);
        Ok(business)
    }

    pub fn get(&self, id: &str) -> Result<Business> {
        self.state.db().get_business(id)?.ok_or_else(|| Error::NotFound {
            kind: "business".to_string(),
            id: id.to_string(),
        })
    }

    pub fn list(&self, offset: u32, limit: u32) -> Result<BusinessPage> {
        Ok(BusinessPage {
            businesses: self.state.db().list_businesses(offset, limit)?,
            total: self.state.db().count_businesses()?,
            offset,
        })
    }

    pub fn update(&self, session: &Session, id: &str, details: BusinessDetails) -> Result<Business> {
        if details.name.trim().is_empty() {
            return Err(Error::Validation("business name required".to_string()));
        }

        let mut business = self.get(id)?;
        access::require_owner_or_admin(&business.owner_wallet, session)?;

        business.name = details.name;
        business.category = details.category;
        business.description = details.description;
        business.contact_email = details.contact_email;
        self.state.db().update_business(&business)?;

        self.get(id)
    }

    pub fn delete(&self, session: &Session, id: &str) -> Result<()> {
        let business = self.get(id)?;
        access::require_owner_or_admin(&business.owner_wallet, session)?;

        self.state.db().delete_business(id)?;
        info!("Business {} delisted", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use crate::config::EngineConfig;
    use cotravel_common::{Database, Role};
    use std::sync::Arc;

    fn service() -> BusinessService {
        let db = Database::open_memory().unwrap();
        BusinessService::new(StateManager::with_parts(
            EngineConfig::default(),
            db,
            Arc::new(MockChain::new()),
        ))
    }

    fn session(wallet: &str, role: Role) -> Session {
        Session {
            wallet_address: wallet.to_string(),
            token: "tok".to_string(),
            issued_at: 0,
            expires_at: i64::MAX,
            role,
        }
    }

    fn details(name: &str) -> BusinessDetails {
        BusinessDetails {
            name: name.to_string(),
            category: Some("lodging".to_string()),
            description: None,
            contact_email: None,
        }
    }

    #[test]
    fn test_crud() {
        let svc = service();
        let owner = session("GOWN", Role::User);

        let business = svc.create(&owner, details("Villa Ubud")).unwrap();
        assert_eq!(svc.get(&business.id).unwrap().name, "Villa Ubud");

        let updated = svc.update(&owner, &business.id, details("Villa Ubud Deluxe")).unwrap();
        assert_eq!(updated.name, "Villa Ubud Deluxe");

        svc.delete(&owner, &business.id).unwrap();
        assert!(svc.get(&business.id).is_err());
    }

    #[test]
    fn test_name_required() {
        let svc = service();
        let owner = session("GOWN", Role::User);
        let err = svc.create(&owner, details("  ")).unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: business name required");
    }

    #[test]
    fn test_writes_require_owner_or_admin() {
        let svc = service();
        let owner = session("GOWN", Role::User);
        let stranger = session("GSTRANGER", Role::User);
        let admin = session("GADMIN", Role::Admin);

        let business = svc.create(&owner, details("Villa")).unwrap();
        assert!(svc.update(&stranger, &business.id, details("Hijacked")).is_err());
        assert!(svc.delete(&stranger, &business.id).is_err());

        svc.update(&admin, &business.id, details("Moderated")).unwrap();
        svc.delete(&admin, &business.id).unwrap();
    }

    #[test]
    fn test_pagination() {
        let svc = service();
        let owner = session("GOWN", Role::User);
        for i in 0..7 {
            svc.create(&owner, details(&format!("Biz {}", i))).unwrap();
        }

        let page = svc.list(0, 5).unwrap();
        assert_eq!(page.businesses.len(), 5);
        assert_eq!(page.total, 7);
        let page = svc.list(5, 5).unwrap();
        assert_eq!(page.businesses.len(), 2);
    }
}
