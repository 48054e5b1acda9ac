//! Cryptographic utilities: SEP-0053 signed-message verification and
//! Stellar strkey account-id handling.
//!
//! Wallets sign login challenges with `signMessage`, which prepends
//! "Stellar Signed Message:\n" and SHA-256 hashes before signing with the
//! account's Ed25519 key.

use crate::{Error, Result};
use data_encoding::BASE32_NOPAD;
use ed25519_dalek::{
    Signature, Signer as DalekSigner, SigningKey, Verifier as DalekVerifier, VerifyingKey,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// SEP-0053 message prefix
const SIGNED_MESSAGE_PREFIX: &[u8] = b"Stellar Signed Message:\n";

/// Strkey version byte for account ids ('G' prefix)
const VERSION_ACCOUNT_ID: u8 = 6 << 3;

/// SHA-256 hash of the prefixed message, the actual Ed25519 payload.
pub fn signed_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SIGNED_MESSAGE_PREFIX);
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Verify a SEP-0053 signed message against a wallet's account id.
///
/// The signature is base64 as delivered by the wallet extension. Any
/// failure (bad strkey, bad base64, wrong key, tampered payload) collapses
/// to an `Auth failed: invalid signature` error; authentication is binary
/// per attempt.
pub fn verify_signed_message(wallet: &str, message: &str, signature_b64: &str) -> Result<()> {
    let invalid = || Error::Auth("invalid signature".to_string());

    let key_bytes = decode_account_id(wallet)?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| invalid())?;

    use base64::Engine;
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|_| invalid())?;
    let sig_bytes: [u8; 64] = sig_bytes.try_into().map_err(|_| invalid())?;
    let signature = Signature::from_bytes(&sig_bytes);

    let hash = signed_message_hash(message);
    DalekVerifier::verify(&verifying_key, &hash, &signature).map_err(|_| invalid())
}

/// Encode a 32-byte Ed25519 public key as a Stellar account id (G...).
pub fn encode_account_id(key: &[u8; 32]) -> String {
    let mut payload = vec![VERSION_ACCOUNT_ID];
    payload.extend_from_slice(key);
    let checksum = crc16_xmodem(&payload);
    payload.extend_from_slice(&checksum.to_le_bytes());
    BASE32_NOPAD.encode(&payload)
}

/// Decode a Stellar account id (G...) into its raw public key bytes.
pub fn decode_account_id(s: &str) -> Result<[u8; 32]> {
    let invalid = |why: &str| Error::Validation(format!("invalid wallet address: {}", why));

    let decoded = BASE32_NOPAD
        .decode(s.as_bytes())
        .map_err(|_| invalid("bad base32"))?;
    // 1 version byte + 32 key bytes + 2 checksum bytes
    if decoded.len() != 35 {
        return Err(invalid("wrong length"));
    }
    if decoded[0] != VERSION_ACCOUNT_ID {
        return Err(invalid("not an account id"));
    }
    let checksum_pos = decoded.len() - 2;
    let checksum = u16::from_le_bytes([decoded[checksum_pos], decoded[checksum_pos + 1]]);
    if checksum != crc16_xmodem(&decoded[..checksum_pos]) {
        return Err(invalid("checksum mismatch"));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded[1..33]);
    Ok(key)
}

/// CRC16-XModem checksum used by strkey.
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Ed25519 wallet keypair. Production verification only needs public keys;
/// this exists for tests and tooling that must produce SEP-0053 signatures.
#[derive(Clone)]
pub struct WalletKeyPair {
    signing_key: SigningKey,
}

impl WalletKeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// The account id (G...) for this keypair
    pub fn account_id(&self) -> String {
        encode_account_id(&self.signing_key.verifying_key().to_bytes())
    }

    /// Produce a base64 SEP-0053 signature over a message
    pub fn sign_message(&self, message: &str) -> String {
        use base64::Engine;
        let hash = signed_message_hash(message);
        let sig = self.signing_key.sign(&hash);
        base64::engine::general_purpose::STANDARD.encode(sig.to_bytes())
    }
}

impl std::fmt::Debug for WalletKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletKeyPair")
            .field("account_id", &self.account_id())
            .finish()
    }
}
