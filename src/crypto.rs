//! Cryptographic operations for the COA Registry Service
//!
//! Wallet principals are Ed25519 keys. This module parses public keys,
//! verifies request signatures, and derives the stable principal id
//! (wallet address) from a key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::types::PrincipalId;

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Crypto operation errors
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid public key format: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),
    #[error("Signature verification failed")]
    VerificationFailed,
    #[error("Base64 decode error: {0}")]
    Base64Error(String),
}

/// Parse an Ed25519 public key from base64 (raw 32 bytes) or PEM
pub fn parse_public_key(encoded: &str) -> CryptoResult<VerifyingKey> {
    let key_bytes = if encoded.contains("-----BEGIN") {
        // PEM format - extract the base64 content
        let lines: Vec<&str> = encoded
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect();
        let b64 = lines.join("");
        let der = BASE64
            .decode(&b64)
            .map_err(|e| CryptoError::Base64Error(e.to_string()))?;

        // Ed25519 public key in PKCS#8/SPKI format has a header
        // The actual key is the last 32 bytes
        if der.len() >= 32 {
            der[der.len() - 32..].to_vec()
        } else {
            return Err(CryptoError::InvalidPublicKey(
                "Ed25519 key too short".into(),
            ));
        }
    } else {
        BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Base64Error(e.to_string()))?
    };

    if key_bytes.len() != 32 {
        return Err(CryptoError::InvalidPublicKey(format!(
            "Ed25519 key must be 32 bytes, got {}",
            key_bytes.len()
        )));
    }

    let key_array: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("Invalid key length".into()))?;

    VerifyingKey::from_bytes(&key_array)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Verify an Ed25519 signature against a message
pub fn verify_signature(
    public_key: &VerifyingKey,
    message: &[u8],
    signature_b64: &str,
) -> CryptoResult<()> {
    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| CryptoError::Base64Error(e.to_string()))?;

    if sig_bytes.len() != 64 {
        return Err(CryptoError::InvalidSignature(format!(
            "Ed25519 signature must be 64 bytes, got {}",
            sig_bytes.len()
        )));
    }
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature("Invalid signature length".into()))?;
    let signature = Signature::from_bytes(&sig_array);

    public_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Derive the wallet address (principal id) from an Ed25519 public key.
///
/// One-way derivation: `wlt_` + first 40 hex chars of SHA256(key bytes).
pub fn derive_principal(public_key: &VerifyingKey) -> PrincipalId {
    let mut hasher = Sha256::new();
    hasher.update(public_key.as_bytes());
    let fingerprint = hex::encode(hasher.finalize());
    format!("wlt_{}", &fingerprint[..40])
}

/// Compute SHA256 hash of data (hex encoded)
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Generate a random nonce (32 bytes, hex encoded)
pub fn generate_nonce() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}
