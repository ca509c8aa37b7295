//! # Pairio Core
//!
//! Admission control for the Pairio key/value service.
//!
//! Each channel (tenant) owns a password and a set of collections. Every
//! collection carries a per-minute quota of reads and writes plus a ceiling
//! on in-flight operations. This crate decides, for every request, whether it
//! may run now, must wait, or is rejected, and reconciles the counters once
//! the operation completes.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ AdmissionEngine::authorize                   │
//! │  ├── ChannelRegistry::resolve                │
//! │  ├── SignatureVerifier::verify               │
//! │  └── CollectionState::request_admission      │
//! │        ├── Admitted  ──> run ──> finalize    │
//! │        ├── Deferred  ──> wait_ready ──> run  │
//! │        └── Rejected                          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use pairio_core::{AdmissionEngine, ChannelRegistry, Decision, EngineConfig};
//! use pairio_core::{OperationKind, PairioConfig, RequestContext};
//!
//! let config = PairioConfig::load_from_dir("/var/lib/pairio")?;
//! let engine = AdmissionEngine::new(
//!     ChannelRegistry::from_config(&config)?,
//!     EngineConfig::default(),
//! );
//!
//! let ctx = RequestContext::get();
//! match engine.authorize(OperationKind::Read, "lab", "default", "k1", None, &sig, &ctx) {
//!     Decision::Admitted(ticket) => { /* run, then */ engine.finalize("lab", ticket) }
//!     Decision::Deferred(mut ticket) => { ticket.wait_ready().await; /* ... */ }
//!     Decision::Rejected { reason, penalty } => { /* ... */ }
//! }
//! ```
//!
//! ## Signatures
//!
//! A caller proves knowledge of the channel password by sending the hex
//! digest of the compact JSON object `{collection, key, name, password[, value]}`
//! with keys in alphabetical order. SHA-256 is the default; SHA-1 is accepted
//! for older clients.

pub mod admission;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod signature;

pub use admission::{
    AdmissionTicket, CollectionSnapshot, CollectionState, OperationKind, QuotaExceeded, TicketId,
    WindowKey,
};
pub use config::{ChannelConfig, CollectionConfig, PairioConfig, CONFIG_FILE_NAME};
pub use engine::{
    AdmissionEngine, Decision, EngineConfig, RejectReason, RequestContext, DEFAULT_AUTH_PENALTY,
};
pub use error::{Error, Result};
pub use registry::{Channel, ChannelRegistry, ChannelSnapshot};
pub use signature::{hash_key, sign, SignatureAlgorithm, SignatureVerifier};
