//! Core types for the COA Registry Service
//!
//! A Chain-of-Authority (COA) group ties several wallet identities to a
//! single primary wallet. These are the record shapes the registry persists
//! plus the request/response types of the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wallet principal identifier, derived from the wallet's Ed25519 public key.
pub type PrincipalId = String;

/// Numeric COA user id, assigned once per onboarding from the global counter.
pub type CoaUserId = u64;

/// Sentinel id meaning "no active group membership".
pub const NO_MEMBERSHIP: CoaUserId = 0;

// ============ Registry Records ============

/// Registry singleton: global counter state plus deployment bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoaConfig {
    /// Principal that ran `initialize`. Bookkeeping only, no runtime privilege.
    pub owner: PrincipalId,
    /// Principals holding delegated succession authority over groups.
    pub editors: Vec<PrincipalId>,
    /// Id assigned to the next onboarded wallet. Starts at 1, never decreases.
    pub next_user_id: CoaUserId,
    /// Count of id assignments so far. Never decremented.
    pub total_users: u64,
    /// When the registry was initialized.
    pub initialized_at: DateTime<Utc>,
}

/// One record per wallet that has ever touched the registry.
///
/// `coa_user_id == 0` marks a record with no active membership; such a
/// record is never primary and may be re-onboarded with a fresh id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// Group id while membership is active, 0 otherwise.
    pub coa_user_id: CoaUserId,
    /// Owning wallet. Immutable after creation.
    pub wallet_address: PrincipalId,
    /// True iff this record anchors its COA group.
    pub is_primary: bool,
    /// Member wallets of this group, insertion order. Primary records only.
    pub authorized_wallets: Vec<PrincipalId>,
    /// When this wallet last gained a membership.
    pub onboard_date: DateTime<Utc>,
}

impl UserAccount {
    /// Whether this record currently belongs to a group.
    pub fn has_membership(&self) -> bool {
        self.coa_user_id != NO_MEMBERSHIP
    }

    /// Whether this record is a non-primary member of `group`.
    pub fn is_member_of(&self, group: CoaUserId) -> bool {
        self.coa_user_id == group && !self.is_primary
    }
}

// ============ Events ============

/// Published on the broadcast channel after each successful state transition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    Onboarded {
        wallet: PrincipalId,
        coa_user_id: CoaUserId,
    },
    AuthorizedWalletAdded {
        coa_user_id: CoaUserId,
        wallet: PrincipalId,
    },
    AuthorizedWalletRemoved {
        coa_user_id: CoaUserId,
        wallet: PrincipalId,
    },
    PrimaryOwnershipTransferred {
        coa_user_id: CoaUserId,
        from: PrincipalId,
        to: PrincipalId,
    },
    GroupLeft {
        coa_user_id: CoaUserId,
        wallet: PrincipalId,
    },
}

// ============ API Request Types ============

/// Signed request wrapper - every mutating request uses this.
///
/// The caller principal is derived from `public_key` after the signature
/// over `payload_json|timestamp|nonce` verifies.
#[derive(Debug, Serialize, Deserialize)]
pub struct SignedRequest<T> {
    /// The actual request payload
    pub payload: T,
    /// Ed25519 public key of the caller (base64, raw 32 bytes or PEM)
    pub public_key: String,
    /// Signature over the canonical message (base64)
    pub signature: String,
    /// Timestamp (for replay protection)
    pub timestamp: DateTime<Utc>,
    /// Nonce (for replay protection)
    pub nonce: String,
}

/// `initialize` payload. The caller becomes the registry owner.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InitializeRequest {}

/// `onboard` payload. The caller becomes its own one-member primary group.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OnboardRequest {}

/// `add_authorized_wallet` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct AddWalletRequest {
    /// Wallet to add to the caller's group
    pub wallet: PrincipalId,
}

/// `remove_authorized_wallet` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveWalletRequest {
    /// Wallet to remove from the caller's group
    pub wallet: PrincipalId,
}

/// `transfer_primary_ownership` / `set_new_primary_ownership` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferOwnershipRequest {
    /// Member wallet to promote to primary
    pub new_primary: PrincipalId,
}

/// `leave_coa_account` payload.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LeaveRequest {}

// ============ Response Types ============

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable machine-readable failure kind, e.g. "not_primary"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
            hint: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code.into()),
            hint: None,
        }
    }

    pub fn error_with_hint(
        message: impl Into<String>,
        code: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code.into()),
            hint: Some(hint.into()),
        }
    }
}

/// Account view returned by mutating operations and lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub wallet_address: PrincipalId,
    pub coa_user_id: CoaUserId,
    pub is_primary: bool,
    pub authorized_wallets: Vec<PrincipalId>,
    pub onboard_date: DateTime<Utc>,
}

impl From<&UserAccount> for AccountResponse {
    fn from(a: &UserAccount) -> Self {
        Self {
            wallet_address: a.wallet_address.clone(),
            coa_user_id: a.coa_user_id,
            is_primary: a.is_primary,
            authorized_wallets: a.authorized_wallets.clone(),
            onboard_date: a.onboard_date,
        }
    }
}

/// Registry config view (initialize response and GET /config).
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub owner: PrincipalId,
    pub next_user_id: CoaUserId,
    pub total_users: u64,
    pub editors: Vec<PrincipalId>,
    pub initialized_at: DateTime<Utc>,
}

impl From<&CoaConfig> for ConfigResponse {
    fn from(c: &CoaConfig) -> Self {
        Self {
            owner: c.owner.clone(),
            next_user_id: c.next_user_id,
            total_users: c.total_users,
            editors: c.editors.clone(),
            initialized_at: c.initialized_at,
        }
    }
}

/// Transfer response carries both sides of the succession.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub coa_user_id: CoaUserId,
    pub old_primary: AccountResponse,
    pub new_primary: AccountResponse,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub initialized: bool,
}

/// Public stats response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub initialized: bool,
    pub total_users: u64,
    pub next_user_id: CoaUserId,
    pub total_groups: usize,
    pub active_memberships: usize,
    pub known_wallets: usize,
}
