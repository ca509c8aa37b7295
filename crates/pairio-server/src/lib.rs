//! # Pairio Server
//!
//! HTTP front end for the Pairio key/value service. Requests are admitted by
//! [`pairio_core::AdmissionEngine`] before they reach a [`StorageBackend`].
//!
//! ```bash
//! # Serve the channels defined in $PAIRIO_DIR/pairio.json
//! PAIRIO_DIR=/var/lib/pairio pairio serve --port 20443
//!
//! # Store and fetch a value
//! pairio set default mykey myvalue --url http://localhost:20443 --channel lab --password secret
//! pairio get default mykey --url http://localhost:20443 --channel lab --password secret
//!
//! # Keep a local copy and fall back to the server on a miss
//! pairio set default mykey myvalue --set-to local-and-remote ...
//! pairio get default mykey --get-from local-then-remote ...
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod local;
pub mod server;
pub mod storage;

pub use client::{ClientError, GetFrom, Key, PairioClient, SetTo};
pub use config::{ServerConfig, StorageConfig};
pub use error::{error_codes, ServerError, ServerResult, StorageError};
pub use local::LocalStore;
pub use server::{PairioServer, ServerState};
pub use storage::{create_storage, MemoryStorage, Storage, StorageBackend};
