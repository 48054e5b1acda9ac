//! Wallet-signature authentication.
//!
//! Login is a two-step challenge flow: the client requests a one-time
//! challenge message for its wallet, signs it per SEP-0053, and exchanges
//! the signature for a bearer session token. No passwords exist anywhere.

use crate::state::StateManager;
use cotravel_common::{crypto, Error, Result, Role, Session};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Session token claims
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Wallet address
    sub: String,
    role: String,
    iat: i64,
    exp: i64,
}

/// Outstanding login challenge, one per wallet
#[derive(Debug, Clone)]
struct Challenge {
    message: String,
    expires_at: i64,
}

/// Authentication service
pub struct AuthService {
    state: StateManager,
    challenges: DashMap<String, Challenge>,
}

impl AuthService {
    pub fn new(state: StateManager) -> Self {
        Self {
            state,
            challenges: DashMap::new(),
        }
    }

    /// Issue a login challenge for a wallet. Re-requesting replaces any
    /// outstanding challenge for the same wallet.
    pub fn issue_challenge(&self, wallet: &str) -> Result<String> {
        crypto::decode_account_id(wallet)?;

        let mut nonce = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let message = format!("CoTravel Login: {}", hex::encode(nonce));

        let ttl = self.state.config().auth.challenge_ttl_secs;
        self.challenges.insert(
            wallet.to_string(),
            Challenge {
                message: message.clone(),
                expires_at: chrono::Utc::now().timestamp() + ttl,
            },
        );

        debug!("Issued login challenge for {}", wallet);
        Ok(message)
    }

    /// Exchange a signed challenge for a session. The challenge is consumed
    /// whether or not verification succeeds.
    pub fn login(&self, wallet: &str, signature_b64: &str) -> Result<Session> {
        let (_, challenge) = self
            .challenges
            .remove(wallet)
            .ok_or_else(|| Error::Auth("no outstanding challenge".to_string()))?;

        if chrono::Utc::now().timestamp() >= challenge.expires_at {
            return Err(Error::Auth("challenge expired".to_string()));
        }

        crypto::verify_signed_message(wallet, &challenge.message, signature_b64)?;

        let user = self.state.db().find_or_create_user(wallet)?;

        let now = chrono::Utc::now().timestamp();
        let ttl = self.state.config().auth.session_ttl_hours * 3600;
        let claims = Claims {
            sub: wallet.to_string(),
            role: user.role.to_string(),
            iat: now,
            exp: now + ttl,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.state.jwt_secret().as_bytes()),
        )
        .map_err(|e| Error::Internal(format!("token encoding: {}", e)))?;

        let session = Session {
            wallet_address: wallet.to_string(),
            token,
            issued_at: now,
            expires_at: now + ttl,
            role: user.role,
        };
        self.state.db().insert_session(&session)?;

        info!("Wallet {} logged in", wallet);
        Ok(session)
    }

    /// Resolve a bearer token to a live session.
    ///
    /// The token must both verify cryptographically and still exist in the
    /// session table, so explicit disconnects revoke tokens before expiry.
    /// The role comes from the user row, not the token, so role changes
    /// apply to existing sessions.
    pub fn authenticate(&self, token: &str) -> Result<Session> {
        let invalid = || Error::Auth("invalid or expired session".to_string());

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.state.jwt_secret().as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| invalid())?;

        let session = self.state.db().get_session(token)?.ok_or_else(invalid)?;
        if session.wallet_address != data.claims.sub {
            return Err(invalid());
        }
        Ok(session)
    }

    /// Revoke a session
    pub fn disconnect(&self, token: &str) -> Result<()> {
        self.state.db().delete_session(token)?;
        Ok(())
    }

    /// Current role for a wallet, defaulting to user for unknown wallets
    pub fn role_of(&self, wallet: &str) -> Result<Role> {
        Ok(self
            .state
            .db()
            .get_user(wallet)?
            .map(|u| u.role)
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("challenges", &self.challenges.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use crate::config::EngineConfig;
    use cotravel_common::crypto::WalletKeyPair;
    use cotravel_common::Database;
    use std::sync::Arc;

    fn auth_with_config(config: EngineConfig) -> AuthService {
        let db = Database::open_memory().unwrap();
        AuthService::new(StateManager::with_parts(
            config,
            db,
            Arc::new(MockChain::new()),
        ))
    }

    fn auth() -> AuthService {
        auth_with_config(EngineConfig::default())
    }

    #[test]
    fn test_challenge_login_flow() {
        let auth = auth();
        let kp = WalletKeyPair::generate();
        let wallet = kp.account_id();

        let message = auth.issue_challenge(&wallet).unwrap();
        assert!(message.starts_with("CoTravel Login: "));

        let session = auth.login(&wallet, &kp.sign_message(&message)).unwrap();
        assert_eq!(session.wallet_address, wallet);
        assert_eq!(session.role, Role::User);
        assert_eq!(session.expires_at - session.issued_at, 24 * 3600);

        let resolved = auth.authenticate(&session.token).unwrap();
        assert_eq!(resolved.wallet_address, wallet);
    }

    #[test]
    fn test_challenge_is_single_use() {
        let auth = auth();
        let kp = WalletKeyPair::generate();
        let wallet = kp.account_id();

        let message = auth.issue_challenge(&wallet).unwrap();
        let sig = kp.sign_message(&message);
        auth.login(&wallet, &sig).unwrap();

        let err = auth.login(&wallet, &sig).unwrap_err();
        assert_eq!(err.to_string(), "Auth failed: no outstanding challenge");
    }

    #[test]
    fn test_bad_signature_consumes_challenge() {
        let auth = auth();
        let kp = WalletKeyPair::generate();
        let other = WalletKeyPair::generate();
        let wallet = kp.account_id();

        let message = auth.issue_challenge(&wallet).unwrap();
        let err = auth.login(&wallet, &other.sign_message(&message)).unwrap_err();
        assert_eq!(err.to_string(), "Auth failed: invalid signature");

        // gone even after a failed attempt
        let err = auth.login(&wallet, &kp.sign_message(&message)).unwrap_err();
        assert_eq!(err.to_string(), "Auth failed: no outstanding challenge");
    }

    #[test]
    fn test_expired_challenge_rejected() {
        let mut config = EngineConfig::default();
        config.auth.challenge_ttl_secs = 0;
        let auth = auth_with_config(config);

        let kp = WalletKeyPair::generate();
        let wallet = kp.account_id();
        let message = auth.issue_challenge(&wallet).unwrap();

        let err = auth.login(&wallet, &kp.sign_message(&message)).unwrap_err();
        assert_eq!(err.to_string(), "Auth failed: challenge expired");
    }

    #[test]
    fn test_disconnect_revokes_token_before_expiry() {
        let auth = auth();
        let kp = WalletKeyPair::generate();
        let wallet = kp.account_id();

        let message = auth.issue_challenge(&wallet).unwrap();
        let session = auth.login(&wallet, &kp.sign_message(&message)).unwrap();

        auth.disconnect(&session.token).unwrap();
        assert!(auth.authenticate(&session.token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let auth = auth();
        assert!(auth.authenticate("not-a-jwt").is_err());
    }

    #[test]
    fn test_bad_wallet_rejected_at_challenge() {
        let auth = auth();
        assert!(auth.issue_challenge("not-a-wallet").is_err());
    }
}
