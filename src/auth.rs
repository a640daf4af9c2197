//! Request authentication for the COA Registry Service
//!
//! There are no sessions or API keys: every mutating request is signed with
//! the caller's Ed25519 wallet key. Verification yields the authenticated
//! `PrincipalId`, which is the only caller identity the core registry sees.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::crypto::{derive_principal, parse_public_key, verify_signature};
use crate::error::{ApiError, ApiResult};
use crate::types::{PrincipalId, SignedRequest};

/// Nonce store for replay protection
pub struct NonceStore {
    /// Used nonces with expiry time
    nonces: DashMap<String, DateTime<Utc>>,
    /// Expiry duration
    expiry: Duration,
}

impl NonceStore {
    pub fn new(expiry_secs: u64) -> Self {
        Self {
            nonces: DashMap::new(),
            expiry: Duration::seconds(expiry_secs as i64),
        }
    }

    /// Check if nonce was already used, and mark it as used if not
    pub fn check_and_mark(&self, nonce: &str) -> bool {
        let now = Utc::now();

        // Clean up expired nonces
        self.nonces.retain(|_, expiry| *expiry > now);

        if self.nonces.contains_key(nonce) {
            return false; // Replay detected
        }

        self.nonces.insert(nonce.to_string(), now + self.expiry);
        true
    }

    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }
}

/// Canonical message a caller signs: `payload_json|timestamp_rfc3339|nonce`.
pub fn signing_message<T: Serialize>(
    payload: &T,
    timestamp: &DateTime<Utc>,
    nonce: &str,
) -> Result<String, serde_json::Error> {
    let payload_json = serde_json::to_string(payload)?;
    Ok(format!(
        "{}|{}|{}",
        payload_json,
        timestamp.to_rfc3339(),
        nonce
    ))
}

/// Verify a signed request and return the authenticated caller principal.
///
/// Checks, in order: timestamp freshness, nonce uniqueness, key parsing,
/// signature over the canonical message. The principal is derived from the
/// verified public key, so a caller can only ever act as its own wallet.
pub fn verify_signed_request<T: Serialize>(
    req: &SignedRequest<T>,
    nonce_store: &NonceStore,
    max_clock_skew: u64,
) -> ApiResult<PrincipalId> {
    let now = Utc::now();
    let skew = Duration::seconds(max_clock_skew as i64);

    if req.timestamp < now - skew || req.timestamp > now + skew {
        return Err(ApiError::TimestampInvalid);
    }

    if !nonce_store.check_and_mark(&req.nonce) {
        return Err(ApiError::ReplayDetected);
    }

    let public_key = parse_public_key(&req.public_key)
        .map_err(|e| ApiError::bad_request(format!("Invalid public key: {}", e)))?;

    let message = signing_message(&req.payload, &req.timestamp, &req.nonce)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    verify_signature(&public_key, message.as_bytes(), &req.signature)
        .map_err(|e| ApiError::unauthorized(format!("Signature invalid: {}", e)))?;

    Ok(derive_principal(&public_key))
}
