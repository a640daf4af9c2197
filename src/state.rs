//! Application state for the COA Registry Service

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Notify};
use tokio::time::interval;

use crate::auth::NonceStore;
use crate::config::Config;
use crate::registry::{CoaRegistry, RegistryResult, RegistrySnapshot};
use crate::types::{
    CoaConfig, PrincipalId, RegistryEvent, TransferResponse, UserAccount,
};

/// Global application state
pub struct AppState {
    /// The authoritative COA registry
    pub registry: CoaRegistry,
    /// Nonce store for replay protection
    pub nonces: NonceStore,
    /// Broadcast channel for registry events
    pub events: broadcast::Sender<RegistryEvent>,
    /// Configuration
    pub config: Config,
    /// Start time for uptime calculation
    pub start_time: Instant,
    /// Persistence dirty flag
    dirty: AtomicBool,
    /// Notify for immediate save
    persist_notify: Notify,
    /// Shutdown flag
    shutdown: AtomicBool,
    /// Last persist time
    pub last_persist: std::sync::RwLock<Option<DateTime<Utc>>>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let (tx, _) = broadcast::channel(1024);

        Arc::new(Self {
            registry: CoaRegistry::new(),
            nonces: NonceStore::new(config.nonce_expiry),
            events: tx,
            config,
            start_time: Instant::now(),
            dirty: AtomicBool::new(false),
            persist_notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            last_persist: std::sync::RwLock::new(None),
        })
    }

    // ============ Registry Operations ============
    //
    // Thin wrappers over the core: run the operation, and on success mark
    // the state dirty and publish the event. Failures pass through with no
    // side effects.

    pub async fn initialize(&self, caller: &PrincipalId) -> RegistryResult<CoaConfig> {
        let config = self
            .registry
            .initialize(caller, &self.config.editors)
            .await?;
        self.mark_dirty();
        Ok(config)
    }

    pub async fn onboard(&self, caller: &PrincipalId) -> RegistryResult<UserAccount> {
        let (account, event) = self.registry.onboard(caller).await?;
        self.commit(event);
        Ok(account)
    }

    pub async fn add_authorized_wallet(
        &self,
        caller: &PrincipalId,
        target: &PrincipalId,
    ) -> RegistryResult<UserAccount> {
        let (account, event) = self.registry.add_authorized_wallet(caller, target).await?;
        self.commit(event);
        Ok(account)
    }

    pub async fn remove_authorized_wallet(
        &self,
        caller: &PrincipalId,
        target: &PrincipalId,
    ) -> RegistryResult<UserAccount> {
        let (account, event) = self
            .registry
            .remove_authorized_wallet(caller, target)
            .await?;
        self.commit(event);
        Ok(account)
    }

    pub async fn transfer_primary_ownership(
        &self,
        caller: &PrincipalId,
        candidate: &PrincipalId,
    ) -> RegistryResult<TransferResponse> {
        let (old, new, event) = self
            .registry
            .transfer_primary_ownership(caller, candidate)
            .await?;
        self.commit(event);
        Ok(TransferResponse {
            coa_user_id: new.coa_user_id,
            old_primary: (&old).into(),
            new_primary: (&new).into(),
        })
    }

    pub async fn set_new_primary_ownership(
        &self,
        caller: &PrincipalId,
        candidate: &PrincipalId,
    ) -> RegistryResult<TransferResponse> {
        let (old, new, event) = self
            .registry
            .set_new_primary_ownership(caller, candidate)
            .await?;
        self.commit(event);
        Ok(TransferResponse {
            coa_user_id: new.coa_user_id,
            old_primary: (&old).into(),
            new_primary: (&new).into(),
        })
    }

    pub async fn leave_coa_account(&self, caller: &PrincipalId) -> RegistryResult<UserAccount> {
        let (account, event) = self.registry.leave_coa_account(caller).await?;
        self.commit(event);
        Ok(account)
    }

    fn commit(&self, event: RegistryEvent) {
        self.mark_dirty();
        // Only fails when nobody is listening, which is fine.
        let _ = self.events.send(event);
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.persist_notify.notify_one();
    }

    // ============ Persistence ============

    /// Load registry state from disk
    pub async fn load_from_disk(self: &Arc<Self>) -> anyhow::Result<()> {
        let path = self.config.state_file_path();

        if path.exists() {
            let json = tokio::fs::read_to_string(&path).await?;
            let snapshot: PersistedState = serde_json::from_str(&json)?;
            self.registry.restore(snapshot.registry).await;

            let stats = self.registry.stats().await;
            tracing::info!(
                wallets = stats.known_wallets,
                groups = stats.total_groups,
                "Loaded registry state"
            );
        } else {
            tracing::info!("No existing state file, starting fresh");
        }

        Ok(())
    }

    /// Save registry state to disk
    async fn save_to_disk(&self) -> anyhow::Result<()> {
        let snapshot = PersistedState {
            registry: self.registry.snapshot().await,
            saved_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::create_dir_all(&self.config.data_dir).await?;

        let path = self.config.state_file_path();
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        *self.last_persist.write().unwrap() = Some(Utc::now());
        tracing::debug!(
            wallets = snapshot.registry.accounts.len(),
            "Registry state persisted"
        );
        Ok(())
    }

    /// Start background persistence worker
    pub fn spawn_persister(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        let persist_interval = state.config.persist_interval;

        tokio::spawn(async move {
            let mut ticker = interval(persist_interval);

            loop {
                if state.shutdown.load(Ordering::SeqCst) {
                    tracing::info!("Persister shutting down, final save...");
                    if let Err(e) = state.save_to_disk().await {
                        tracing::error!("Failed final persist: {}", e);
                    }
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => {
                        if state.dirty.swap(false, Ordering::SeqCst) {
                            if let Err(e) = state.save_to_disk().await {
                                tracing::error!("Failed to persist state: {}", e);
                            }
                        }
                    }
                    _ = state.persist_notify.notified() => {
                        if state.dirty.swap(false, Ordering::SeqCst) {
                            if let Err(e) = state.save_to_disk().await {
                                tracing::error!("Failed to persist state: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Signal shutdown
    pub fn signal_shutdown(&self) {
        tracing::info!("Shutdown signaled");
        self.shutdown.store(true, Ordering::SeqCst);
        self.persist_notify.notify_one();
    }

    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    // ============ Health ============

    pub async fn health(&self) -> crate::types::HealthResponse {
        crate::types::HealthResponse {
            status: "healthy".into(),
            version: self.config.version.clone(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            initialized: self.registry.is_initialized().await,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedState {
    registry: RegistrySnapshot,
    saved_at: DateTime<Utc>,
}
