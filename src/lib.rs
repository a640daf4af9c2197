//! COA Registry Service
//!
//! Authorization registry that groups wallet identities under a single
//! primary wallet, forming a Chain-of-Authority (COA) group. A primary can
//! authorize or revoke member wallets and hand over primary status; members
//! can leave; a global counter assigns every onboarded wallet a unique,
//! monotonically increasing id.
//!
//! ## Architecture
//!
//! - **Registry**: the core state machine — `CoaConfig` singleton plus one
//!   `UserAccount` per wallet, mutated only by the seven operations
//! - **Authentication**: every mutating request is signed with the caller's
//!   Ed25519 wallet key; the principal id is derived from the key
//! - **Events**: successful transitions are broadcast to WebSocket observers
//! - **Persistence**: periodic JSON snapshots, restored on startup

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod registry;
pub mod state;
pub mod types;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use registry::{CoaRegistry, RegistryError};
pub use state::AppState;
