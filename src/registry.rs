//! The COA authorization state machine
//!
//! One registry per deployment: the `CoaConfig` singleton (global id counter)
//! plus one `UserAccount` record per wallet that ever onboarded. The seven
//! operations below are the only writers. Each takes the write lock once,
//! validates every guard, then mutates, so a failed operation leaves no
//! partial state and same-group operations serialize on the lock.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::types::{
    CoaConfig, CoaUserId, PrincipalId, RegistryEvent, UserAccount, NO_MEMBERSHIP,
};

/// Precondition failures of the seven operations.
///
/// All are detected before any mutation; the registry itself stays usable
/// after any of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry is already initialized")]
    AlreadyInitialized,

    #[error("Registry is not initialized")]
    NotInitialized,

    #[error("Wallet already holds an active COA membership")]
    AlreadyOnboarded,

    #[error("Wallet has no active COA membership")]
    NotOnboarded,

    #[error("Only the primary wallet of a group may do this")]
    NotPrimary,

    #[error("Target wallet already belongs to a COA group")]
    AlreadyHasMembership,

    #[error("Target wallet is not a member of this group")]
    NotMember,

    #[error("A wallet cannot remove itself; use leave instead")]
    SelfRemovalNotAllowed,

    #[error("Candidate wallet does not belong to the caller's group")]
    GroupMismatch,

    #[error("Caller does not hold succession authority")]
    Unauthorized,

    #[error("The primary wallet must transfer ownership before leaving")]
    PrimaryCannotLeave,
}

impl RegistryError {
    /// Stable machine-readable code surfaced in API error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyInitialized => "already_initialized",
            Self::NotInitialized => "not_initialized",
            Self::AlreadyOnboarded => "already_onboarded",
            Self::NotOnboarded => "not_onboarded",
            Self::NotPrimary => "not_primary",
            Self::AlreadyHasMembership => "already_has_membership",
            Self::NotMember => "not_member",
            Self::SelfRemovalNotAllowed => "self_removal_not_allowed",
            Self::GroupMismatch => "group_mismatch",
            Self::Unauthorized => "unauthorized",
            Self::PrimaryCannotLeave => "primary_cannot_leave",
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Default)]
struct RegistryInner {
    /// The singleton. `None` until `initialize` runs.
    config: Option<CoaConfig>,
    /// Every wallet that ever onboarded or was added to a group.
    accounts: HashMap<PrincipalId, UserAccount>,
    /// coa_user_id -> current primary wallet of that group.
    primaries: HashMap<CoaUserId, PrincipalId>,
}

impl RegistryInner {
    fn config(&self) -> RegistryResult<&CoaConfig> {
        self.config.as_ref().ok_or(RegistryError::NotInitialized)
    }

    fn config_mut(&mut self) -> RegistryResult<&mut CoaConfig> {
        self.config.as_mut().ok_or(RegistryError::NotInitialized)
    }

    /// Caller's account, which must hold an active membership.
    fn active_account(&self, wallet: &PrincipalId) -> RegistryResult<&UserAccount> {
        self.accounts
            .get(wallet)
            .filter(|a| a.has_membership())
            .ok_or(RegistryError::NotOnboarded)
    }
}

/// Serialized registry state for the persistence collaborator.
///
/// The primary index is derivable and rebuilt on restore.
#[derive(Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub config: Option<CoaConfig>,
    pub accounts: Vec<UserAccount>,
}

/// The registry. Cheap to share behind an `Arc` via `AppState`.
pub struct CoaRegistry {
    inner: RwLock<RegistryInner>,
}

impl CoaRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    // ============ The Seven Operations ============

    /// Create the `CoaConfig` singleton. The caller becomes the registry
    /// owner and first editor; `extra_editors` come from configuration.
    pub async fn initialize(
        &self,
        caller: &PrincipalId,
        extra_editors: &[PrincipalId],
    ) -> RegistryResult<CoaConfig> {
        let mut inner = self.inner.write().await;

        if inner.config.is_some() {
            return Err(RegistryError::AlreadyInitialized);
        }

        let mut editors = vec![caller.clone()];
        for editor in extra_editors {
            if !editors.contains(editor) {
                editors.push(editor.clone());
            }
        }

        let config = CoaConfig {
            owner: caller.clone(),
            editors,
            next_user_id: 1,
            total_users: 0,
            initialized_at: Utc::now(),
        };
        inner.config = Some(config.clone());

        tracing::info!(owner = %caller, "Registry initialized");
        Ok(config)
    }

    /// Onboard the caller as its own one-member primary group, assigning
    /// the next id from the global counter. A wallet that previously left
    /// (id zeroed) may onboard again and receives a fresh id.
    pub async fn onboard(
        &self,
        caller: &PrincipalId,
    ) -> RegistryResult<(UserAccount, RegistryEvent)> {
        let mut inner = self.inner.write().await;
        inner.config()?;

        if let Some(existing) = inner.accounts.get(caller) {
            if existing.has_membership() {
                return Err(RegistryError::AlreadyOnboarded);
            }
        }

        let config = inner.config_mut()?;
        let user_id = config.next_user_id;
        config.next_user_id += 1;
        config.total_users += 1;

        let account = UserAccount {
            coa_user_id: user_id,
            wallet_address: caller.clone(),
            is_primary: true,
            authorized_wallets: Vec::new(),
            onboard_date: Utc::now(),
        };
        inner.accounts.insert(caller.clone(), account.clone());
        inner.primaries.insert(user_id, caller.clone());

        tracing::info!(wallet = %caller, coa_user_id = user_id, "Wallet onboarded");
        Ok((
            account,
            RegistryEvent::Onboarded {
                wallet: caller.clone(),
                coa_user_id: user_id,
            },
        ))
    }

    /// Add `target` to the caller's group. Membership is exclusive: a
    /// wallet holding any active membership, including its own primary
    /// group, must leave first.
    pub async fn add_authorized_wallet(
        &self,
        caller: &PrincipalId,
        target: &PrincipalId,
    ) -> RegistryResult<(UserAccount, RegistryEvent)> {
        let mut inner = self.inner.write().await;
        inner.config()?;

        let caller_account = inner.active_account(caller)?;
        if !caller_account.is_primary {
            return Err(RegistryError::NotPrimary);
        }
        let group = caller_account.coa_user_id;

        if let Some(existing) = inner.accounts.get(target) {
            if existing.has_membership() {
                return Err(RegistryError::AlreadyHasMembership);
            }
        }

        let now = Utc::now();
        let member = UserAccount {
            coa_user_id: group,
            wallet_address: target.clone(),
            is_primary: false,
            authorized_wallets: Vec::new(),
            onboard_date: now,
        };
        inner.accounts.insert(target.clone(), member.clone());

        let primary = inner
            .accounts
            .get_mut(caller)
            .expect("primary record checked above");
        primary.authorized_wallets.push(target.clone());

        tracing::info!(wallet = %target, coa_user_id = group, "Authorized wallet added");
        Ok((
            member,
            RegistryEvent::AuthorizedWalletAdded {
                coa_user_id: group,
                wallet: target.clone(),
            },
        ))
    }

    /// Remove `target` from the caller's group, zeroing its membership.
    /// Self-removal is rejected unconditionally; the primary leaves its own
    /// group only through ownership transfer.
    pub async fn remove_authorized_wallet(
        &self,
        caller: &PrincipalId,
        target: &PrincipalId,
    ) -> RegistryResult<(UserAccount, RegistryEvent)> {
        if caller == target {
            return Err(RegistryError::SelfRemovalNotAllowed);
        }

        let mut inner = self.inner.write().await;
        inner.config()?;

        let caller_account = inner.active_account(caller)?;
        if !caller_account.is_primary {
            return Err(RegistryError::NotPrimary);
        }
        let group = caller_account.coa_user_id;

        let is_member = inner
            .accounts
            .get(target)
            .map(|a| a.is_member_of(group))
            .unwrap_or(false);
        if !is_member {
            return Err(RegistryError::NotMember);
        }

        let primary = inner
            .accounts
            .get_mut(caller)
            .expect("primary record checked above");
        primary.authorized_wallets.retain(|w| w != target);

        let member = inner
            .accounts
            .get_mut(target)
            .expect("membership checked above");
        member.coa_user_id = NO_MEMBERSHIP;
        member.is_primary = false;
        let member = member.clone();

        tracing::info!(wallet = %target, coa_user_id = group, "Authorized wallet removed");
        Ok((
            member,
            RegistryEvent::AuthorizedWalletRemoved {
                coa_user_id: group,
                wallet: target.clone(),
            },
        ))
    }

    /// Demote the caller and promote `candidate`, atomically. The candidate
    /// must already be a member of the caller's group; the demoted primary
    /// stays in the group as an ordinary member.
    pub async fn transfer_primary_ownership(
        &self,
        caller: &PrincipalId,
        candidate: &PrincipalId,
    ) -> RegistryResult<(UserAccount, UserAccount, RegistryEvent)> {
        let mut inner = self.inner.write().await;
        inner.config()?;
        transfer_locked(&mut inner, caller, candidate)
    }

    /// Authority-gated succession: same guards and effect as
    /// `transfer_primary_ownership`, but the caller must additionally be
    /// listed in the registry's editor set.
    pub async fn set_new_primary_ownership(
        &self,
        caller: &PrincipalId,
        candidate: &PrincipalId,
    ) -> RegistryResult<(UserAccount, UserAccount, RegistryEvent)> {
        let mut inner = self.inner.write().await;

        if !inner.config()?.editors.contains(caller) {
            return Err(RegistryError::Unauthorized);
        }
        transfer_locked(&mut inner, caller, candidate)
    }

    /// Voluntary exit for a non-primary member: zero the membership and
    /// drop the wallet from its group's list. The record itself survives so
    /// the wallet can onboard again later.
    pub async fn leave_coa_account(
        &self,
        caller: &PrincipalId,
    ) -> RegistryResult<(UserAccount, RegistryEvent)> {
        let mut inner = self.inner.write().await;
        inner.config()?;

        let account = inner
            .accounts
            .get(caller)
            .filter(|a| a.has_membership())
            .ok_or(RegistryError::NotMember)?;
        if account.is_primary {
            return Err(RegistryError::PrimaryCannotLeave);
        }
        let group = account.coa_user_id;

        if let Some(primary_wallet) = inner.primaries.get(&group).cloned() {
            if let Some(primary) = inner.accounts.get_mut(&primary_wallet) {
                primary.authorized_wallets.retain(|w| w != caller);
            }
        }

        let member = inner
            .accounts
            .get_mut(caller)
            .expect("membership checked above");
        member.coa_user_id = NO_MEMBERSHIP;
        member.is_primary = false;
        let member = member.clone();

        tracing::info!(wallet = %caller, coa_user_id = group, "Wallet left group");
        Ok((
            member,
            RegistryEvent::GroupLeft {
                coa_user_id: group,
                wallet: caller.clone(),
            },
        ))
    }

    // ============ Read Access ============

    pub async fn config(&self) -> Option<CoaConfig> {
        self.inner.read().await.config.clone()
    }

    pub async fn get_account(&self, wallet: &PrincipalId) -> Option<UserAccount> {
        self.inner.read().await.accounts.get(wallet).cloned()
    }

    /// Current primary record of the group `wallet` belongs to, if any.
    pub async fn group_primary(&self, group: CoaUserId) -> Option<UserAccount> {
        let inner = self.inner.read().await;
        let primary_wallet = inner.primaries.get(&group)?;
        inner.accounts.get(primary_wallet).cloned()
    }

    pub async fn stats(&self) -> crate::types::StatsResponse {
        let inner = self.inner.read().await;
        let active = inner
            .accounts
            .values()
            .filter(|a| a.has_membership())
            .count();
        crate::types::StatsResponse {
            initialized: inner.config.is_some(),
            total_users: inner.config.as_ref().map(|c| c.total_users).unwrap_or(0),
            next_user_id: inner.config.as_ref().map(|c| c.next_user_id).unwrap_or(0),
            total_groups: inner.primaries.len(),
            active_memberships: active,
            known_wallets: inner.accounts.len(),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.read().await.config.is_some()
    }

    // ============ Persistence ============

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read().await;
        RegistrySnapshot {
            config: inner.config.clone(),
            accounts: inner.accounts.values().cloned().collect(),
        }
    }

    /// Replace registry state from a snapshot, rebuilding the primary index.
    pub async fn restore(&self, snapshot: RegistrySnapshot) {
        let mut inner = self.inner.write().await;
        inner.config = snapshot.config;
        inner.accounts.clear();
        inner.primaries.clear();

        for account in snapshot.accounts {
            if account.is_primary {
                inner
                    .primaries
                    .insert(account.coa_user_id, account.wallet_address.clone());
            }
            inner
                .accounts
                .insert(account.wallet_address.clone(), account);
        }
    }
}

impl Default for CoaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared body of the two succession operations, run under the write lock.
fn transfer_locked(
    inner: &mut RegistryInner,
    caller: &PrincipalId,
    candidate: &PrincipalId,
) -> RegistryResult<(UserAccount, UserAccount, RegistryEvent)> {
    let caller_account = inner.active_account(caller)?;
    if !caller_account.is_primary {
        return Err(RegistryError::NotPrimary);
    }
    let group = caller_account.coa_user_id;

    let candidate_ok = inner
        .accounts
        .get(candidate)
        .map(|a| a.is_member_of(group))
        .unwrap_or(false);
    if !candidate_ok {
        return Err(RegistryError::GroupMismatch);
    }

    // Membership list moves to the new primary: candidate out, old primary in.
    let old_primary = inner
        .accounts
        .get_mut(caller)
        .expect("primary record checked above");
    let mut wallets = std::mem::take(&mut old_primary.authorized_wallets);
    wallets.retain(|w| w != candidate);
    wallets.push(caller.clone());
    old_primary.is_primary = false;
    let old_primary = old_primary.clone();

    let new_primary = inner
        .accounts
        .get_mut(candidate)
        .expect("candidate record checked above");
    new_primary.is_primary = true;
    new_primary.authorized_wallets = wallets;
    let new_primary = new_primary.clone();

    inner.primaries.insert(group, candidate.clone());

    tracing::info!(
        coa_user_id = group,
        from = %caller,
        to = %candidate,
        "Primary ownership transferred"
    );
    Ok((
        old_primary,
        new_primary,
        RegistryEvent::PrimaryOwnershipTransferred {
            coa_user_id: group,
            from: caller.clone(),
            to: candidate.clone(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(tag: &str) -> PrincipalId {
        format!("wlt_{tag}")
    }

    async fn initialized() -> (CoaRegistry, PrincipalId) {
        let registry = CoaRegistry::new();
        let deployer = wallet("deployer");
        registry.initialize(&deployer, &[]).await.unwrap();
        (registry, deployer)
    }

    /// Onboard `primary` and add `members` to its group.
    async fn group_of(registry: &CoaRegistry, primary: &PrincipalId, members: &[PrincipalId]) {
        registry.onboard(primary).await.unwrap();
        for member in members {
            registry
                .add_authorized_wallet(primary, member)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn initialize_sets_counters() {
        let registry = CoaRegistry::new();
        let config = registry.initialize(&wallet("a"), &[]).await.unwrap();

        assert_eq!(config.next_user_id, 1);
        assert_eq!(config.total_users, 0);
        assert_eq!(config.owner, wallet("a"));
    }

    #[tokio::test]
    async fn initialize_twice_fails() {
        let (registry, _) = initialized().await;
        let err = registry.initialize(&wallet("b"), &[]).await.unwrap_err();
        assert_eq!(err, RegistryError::AlreadyInitialized);
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let registry = CoaRegistry::new();
        let err = registry.onboard(&wallet("a")).await.unwrap_err();
        assert_eq!(err, RegistryError::NotInitialized);
    }

    #[tokio::test]
    async fn onboard_assigns_first_id() {
        let (registry, _) = initialized().await;
        let (account, _) = registry.onboard(&wallet("a")).await.unwrap();

        assert_eq!(account.coa_user_id, 1);
        assert!(account.is_primary);
        assert!(account.authorized_wallets.is_empty());

        let config = registry.config().await.unwrap();
        assert_eq!(config.next_user_id, 2);
        assert_eq!(config.total_users, 1);
    }

    #[tokio::test]
    async fn onboard_twice_fails() {
        let (registry, _) = initialized().await;
        registry.onboard(&wallet("a")).await.unwrap();
        let err = registry.onboard(&wallet("a")).await.unwrap_err();
        assert_eq!(err, RegistryError::AlreadyOnboarded);
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_unique() {
        let (registry, _) = initialized().await;
        let mut last = 0;
        for i in 0..10 {
            let (account, _) = registry.onboard(&wallet(&format!("w{i}"))).await.unwrap();
            assert!(account.coa_user_id > last);
            last = account.coa_user_id;
        }
        let config = registry.config().await.unwrap();
        assert_eq!(config.next_user_id, 11);
        assert_eq!(config.total_users, 10);
    }

    #[tokio::test]
    async fn re_onboard_after_leave_gets_fresh_id() {
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        group_of(&registry, &a, &[b.clone()]).await;

        registry.leave_coa_account(&b).await.unwrap();
        let (account, _) = registry.onboard(&b).await.unwrap();

        assert_eq!(account.coa_user_id, 2);
        assert!(account.is_primary);
    }

    #[tokio::test]
    async fn add_wallet_joins_group() {
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        registry.onboard(&a).await.unwrap();

        let (member, _) = registry.add_authorized_wallet(&a, &b).await.unwrap();
        assert_eq!(member.coa_user_id, 1);
        assert!(!member.is_primary);

        let primary = registry.get_account(&a).await.unwrap();
        assert_eq!(primary.authorized_wallets, vec![b]);
    }

    #[tokio::test]
    async fn add_preserves_insertion_order() {
        let (registry, _) = initialized().await;
        let a = wallet("a");
        let members: Vec<_> = (0..4).map(|i| wallet(&format!("m{i}"))).collect();
        group_of(&registry, &a, &members).await;

        let primary = registry.get_account(&a).await.unwrap();
        assert_eq!(primary.authorized_wallets, members);
    }

    #[tokio::test]
    async fn add_self_onboarded_wallet_fails() {
        // Scenario 3: B self-onboarded, so its membership is exclusive.
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        registry.onboard(&a).await.unwrap();
        registry.onboard(&b).await.unwrap();

        let err = registry.add_authorized_wallet(&a, &b).await.unwrap_err();
        assert_eq!(err, RegistryError::AlreadyHasMembership);
    }

    #[tokio::test]
    async fn add_member_of_other_group_fails() {
        let (registry, _) = initialized().await;
        let (a, b, c) = (wallet("a"), wallet("b"), wallet("c"));
        group_of(&registry, &a, &[c.clone()]).await;
        registry.onboard(&b).await.unwrap();

        let err = registry.add_authorized_wallet(&b, &c).await.unwrap_err();
        assert_eq!(err, RegistryError::AlreadyHasMembership);
    }

    #[tokio::test]
    async fn add_by_non_primary_fails() {
        let (registry, _) = initialized().await;
        let (a, b, c) = (wallet("a"), wallet("b"), wallet("c"));
        group_of(&registry, &a, &[b.clone()]).await;

        let err = registry.add_authorized_wallet(&b, &c).await.unwrap_err();
        assert_eq!(err, RegistryError::NotPrimary);
    }

    #[tokio::test]
    async fn add_after_leave_is_allowed() {
        let (registry, _) = initialized().await;
        let (a, b, c) = (wallet("a"), wallet("b"), wallet("c"));
        group_of(&registry, &a, &[c.clone()]).await;
        registry.onboard(&b).await.unwrap();

        registry.leave_coa_account(&c).await.unwrap();
        let (member, _) = registry.add_authorized_wallet(&b, &c).await.unwrap();
        assert_eq!(member.coa_user_id, 2);
    }

    #[tokio::test]
    async fn remove_resets_membership() {
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        group_of(&registry, &a, &[b.clone()]).await;

        let (removed, _) = registry.remove_authorized_wallet(&a, &b).await.unwrap();
        assert_eq!(removed.coa_user_id, NO_MEMBERSHIP);
        assert!(!removed.is_primary);

        let primary = registry.get_account(&a).await.unwrap();
        assert!(primary.authorized_wallets.is_empty());
    }

    #[tokio::test]
    async fn remove_self_always_fails() {
        // Scenario 4, including for wallets that are not even onboarded.
        let (registry, _) = initialized().await;
        let a = wallet("a");
        registry.onboard(&a).await.unwrap();

        let err = registry.remove_authorized_wallet(&a, &a).await.unwrap_err();
        assert_eq!(err, RegistryError::SelfRemovalNotAllowed);

        let x = wallet("x");
        let err = registry.remove_authorized_wallet(&x, &x).await.unwrap_err();
        assert_eq!(err, RegistryError::SelfRemovalNotAllowed);
    }

    #[tokio::test]
    async fn remove_non_member_fails() {
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        registry.onboard(&a).await.unwrap();

        let err = registry.remove_authorized_wallet(&a, &b).await.unwrap_err();
        assert_eq!(err, RegistryError::NotMember);
    }

    #[tokio::test]
    async fn remove_member_of_other_group_fails() {
        let (registry, _) = initialized().await;
        let (a, b, c) = (wallet("a"), wallet("b"), wallet("c"));
        group_of(&registry, &a, &[]).await;
        group_of(&registry, &b, &[c.clone()]).await;

        let err = registry.remove_authorized_wallet(&a, &c).await.unwrap_err();
        assert_eq!(err, RegistryError::NotMember);
    }

    #[tokio::test]
    async fn transfer_swaps_primary_atomically() {
        let (registry, _) = initialized().await;
        let (a, b, c) = (wallet("a"), wallet("b"), wallet("c"));
        group_of(&registry, &a, &[b.clone(), c.clone()]).await;

        let (old, new, _) = registry.transfer_primary_ownership(&a, &b).await.unwrap();
        assert!(!old.is_primary);
        assert_eq!(old.coa_user_id, 1);
        assert!(old.authorized_wallets.is_empty());

        assert!(new.is_primary);
        assert_eq!(new.coa_user_id, 1);
        // Candidate left the list, old primary joined it.
        assert_eq!(new.authorized_wallets, vec![c, a]);
    }

    #[tokio::test]
    async fn transfer_keeps_exactly_one_primary() {
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        group_of(&registry, &a, &[b.clone()]).await;

        registry.transfer_primary_ownership(&a, &b).await.unwrap();

        let a_acct = registry.get_account(&a).await.unwrap();
        let b_acct = registry.get_account(&b).await.unwrap();
        assert_eq!(
            [a_acct.is_primary, b_acct.is_primary]
                .iter()
                .filter(|p| **p)
                .count(),
            1
        );
        assert_eq!(
            registry.group_primary(1).await.unwrap().wallet_address,
            b
        );
    }

    #[tokio::test]
    async fn transfer_to_other_group_fails() {
        // Scenario 5: candidate's coa_user_id differs from the caller's.
        let (registry, _) = initialized().await;
        let (a, c) = (wallet("a"), wallet("c"));
        registry.onboard(&a).await.unwrap();
        registry.onboard(&c).await.unwrap();

        let err = registry
            .transfer_primary_ownership(&a, &c)
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::GroupMismatch);
    }

    #[tokio::test]
    async fn transfer_to_unknown_wallet_fails() {
        let (registry, _) = initialized().await;
        let a = wallet("a");
        registry.onboard(&a).await.unwrap();

        let err = registry
            .transfer_primary_ownership(&a, &wallet("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::GroupMismatch);
    }

    #[tokio::test]
    async fn transfer_by_non_primary_fails() {
        let (registry, _) = initialized().await;
        let (a, b, c) = (wallet("a"), wallet("b"), wallet("c"));
        group_of(&registry, &a, &[b.clone(), c.clone()]).await;

        let err = registry
            .transfer_primary_ownership(&b, &c)
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::NotPrimary);
    }

    #[tokio::test]
    async fn old_primary_can_leave_after_transfer() {
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        group_of(&registry, &a, &[b.clone()]).await;

        registry.transfer_primary_ownership(&a, &b).await.unwrap();
        let (left, _) = registry.leave_coa_account(&a).await.unwrap();
        assert_eq!(left.coa_user_id, NO_MEMBERSHIP);

        let primary = registry.get_account(&b).await.unwrap();
        assert!(primary.authorized_wallets.is_empty());
    }

    #[tokio::test]
    async fn set_primary_requires_editor() {
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        group_of(&registry, &a, &[b.clone()]).await;

        // `a` is primary but holds no succession authority.
        let err = registry
            .set_new_primary_ownership(&a, &b)
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::Unauthorized);
    }

    #[tokio::test]
    async fn set_primary_with_editor_succeeds() {
        let registry = CoaRegistry::new();
        let (a, b) = (wallet("a"), wallet("b"));
        // Deployer lists `a` as an editor at initialize time.
        registry.initialize(&wallet("deployer"), &[a.clone()]).await.unwrap();
        group_of(&registry, &a, &[b.clone()]).await;

        let (_, new, _) = registry.set_new_primary_ownership(&a, &b).await.unwrap();
        assert!(new.is_primary);
        assert_eq!(new.wallet_address, b);
    }

    #[tokio::test]
    async fn set_primary_editor_still_needs_matching_group() {
        let registry = CoaRegistry::new();
        let (a, c) = (wallet("a"), wallet("c"));
        registry.initialize(&wallet("deployer"), &[a.clone()]).await.unwrap();
        registry.onboard(&a).await.unwrap();
        registry.onboard(&c).await.unwrap();

        let err = registry
            .set_new_primary_ownership(&a, &c)
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::GroupMismatch);
    }

    #[tokio::test]
    async fn leave_zeroes_membership() {
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        group_of(&registry, &a, &[b.clone()]).await;

        let (left, _) = registry.leave_coa_account(&b).await.unwrap();
        assert_eq!(left.coa_user_id, NO_MEMBERSHIP);
        assert!(!left.is_primary);

        let primary = registry.get_account(&a).await.unwrap();
        assert!(primary.authorized_wallets.is_empty());
        // Record survives for later re-onboarding.
        assert!(registry.get_account(&b).await.is_some());
    }

    #[tokio::test]
    async fn primary_cannot_leave() {
        // Scenario 6.
        let (registry, _) = initialized().await;
        let a = wallet("a");
        registry.onboard(&a).await.unwrap();

        let err = registry.leave_coa_account(&a).await.unwrap_err();
        assert_eq!(err, RegistryError::PrimaryCannotLeave);
    }

    #[tokio::test]
    async fn leave_without_membership_fails() {
        let (registry, _) = initialized().await;
        let err = registry.leave_coa_account(&wallet("x")).await.unwrap_err();
        assert_eq!(err, RegistryError::NotMember);
    }

    #[tokio::test]
    async fn sentinel_invariant_holds_across_transitions() {
        // coa_user_id == 0 implies is_primary == false, at every step.
        let (registry, _) = initialized().await;
        let (a, b, c) = (wallet("a"), wallet("b"), wallet("c"));
        group_of(&registry, &a, &[b.clone(), c.clone()]).await;
        registry.transfer_primary_ownership(&a, &b).await.unwrap();
        registry.remove_authorized_wallet(&b, &c).await.unwrap();
        registry.leave_coa_account(&a).await.unwrap();

        for w in [&a, &b, &c] {
            let account = registry.get_account(w).await.unwrap();
            if account.coa_user_id == NO_MEMBERSHIP {
                assert!(!account.is_primary, "{w} violates the sentinel invariant");
            }
        }
    }

    #[tokio::test]
    async fn failed_operation_has_no_side_effects() {
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        group_of(&registry, &a, &[]).await;
        registry.onboard(&b).await.unwrap();

        let before = registry.stats().await;
        // Target already holds a membership, so nothing may change.
        registry.add_authorized_wallet(&a, &b).await.unwrap_err();
        let after = registry.stats().await;

        assert_eq!(before.total_users, after.total_users);
        assert_eq!(before.next_user_id, after.next_user_id);
        assert!(registry
            .get_account(&a)
            .await
            .unwrap()
            .authorized_wallets
            .is_empty());
    }

    #[tokio::test]
    async fn snapshot_restore_roundtrip() {
        let (registry, _) = initialized().await;
        let (a, b) = (wallet("a"), wallet("b"));
        group_of(&registry, &a, &[b.clone()]).await;

        let snapshot = registry.snapshot().await;
        let restored = CoaRegistry::new();
        restored.restore(snapshot).await;

        let primary = restored.get_account(&a).await.unwrap();
        assert_eq!(primary.authorized_wallets, vec![b.clone()]);
        // Primary index was rebuilt.
        assert_eq!(
            restored.group_primary(1).await.unwrap().wallet_address,
            a
        );
        // The counter resumes where it left off.
        let err = restored.onboard(&a).await.unwrap_err();
        assert_eq!(err, RegistryError::AlreadyOnboarded);
    }

    #[tokio::test]
    async fn concurrent_adds_serialize_on_one_group() {
        use std::sync::Arc;

        let registry = Arc::new(CoaRegistry::new());
        registry.initialize(&wallet("deployer"), &[]).await.unwrap();
        let a = wallet("a");
        registry.onboard(&a).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            let a = a.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .add_authorized_wallet(&a, &wallet(&format!("m{i}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let primary = registry.get_account(&a).await.unwrap();
        assert_eq!(primary.authorized_wallets.len(), 16);
    }
}
