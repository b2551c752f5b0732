//! # Fathom Core
//!
//! Core library for the Fathom media catalog, providing resilient
//! multi-protocol access to the filesystems a catalog is built from.
//!
//! ## Overview
//!
//! `fathom-core` is the storage foundation of the Fathom ecosystem,
//! offering:
//!
//! - **Unified Clients**: One [`client::StorageClient`] contract over
//!   local directories, SMB/CIFS shares, NFS exports, FTP servers, and
//!   WebDAV endpoints
//! - **Resilience**: Per-root circuit breakers, exponential-backoff
//!   retries, and an offline snapshot cache that keeps reads answering
//!   through outages
//! - **Scanning**: A bounded-concurrency directory walker with glob
//!   filtering, content hashing, and resumable checkpoints
//! - **Change Watching**: Debounced change notifications, native for
//!   local roots and poll-based for network roots
//! - **Health Monitoring**: Periodic per-root probes with
//!   degraded/offline state tracking
//!
//! ## Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`client`]: Protocol clients and the unified storage contract
//! - [`resilience`]: Breaker, retry, cache, and the resilient wrapper
//! - [`scan`]: Directory walking and scan reporting
//! - [`watch`]: Debounced change notification service
//! - [`health`]: Connection health monitor
//! - [`manager`]: The facade tying every service together
//!
//! ## Examples
//!
//! ```no_run
//! use fathom_config::{FathomConfig, StorageRootConfig};
//! use fathom_core::manager::StorageManager;
//!
//! async fn catalog_a_share() -> fathom_core::Result<()> {
//!     let manager = StorageManager::new(FathomConfig::default());
//!     manager.start();
//!
//!     let mut root = StorageRootConfig::named("movies", "smb");
//!     root.host = Some("nas.local".to_string());
//!     root.path = "media/movies".to_string();
//!     let root_id = manager.register_root(root)?;
//!
//!     let mut scan = manager.start_scan(root_id, None).await?;
//!     while let Some(record) = scan.recv().await {
//!         println!("{} ({} bytes)", record.path, record.size);
//!     }
//!     scan.join().await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Protocol clients and the unified storage contract
pub mod client;

/// Cancellation and deadline propagation
pub mod context;

/// The storage error taxonomy
pub mod error;

/// Validating client factory
pub mod factory;

/// Connection health monitor
pub mod health;

/// The storage manager facade
pub mod manager;

/// Circuit breaker, retry policy, snapshot cache, and the resilient
/// client wrapper
pub mod resilience;

/// Bounded-concurrency directory scanner
pub mod scan;

/// Persistence ports for snapshots and scan checkpoints
pub mod store;

/// Debounced change notification service
pub mod watch;

pub use client::{FileReader, StorageClient};
pub use context::OpContext;
pub use error::{FsError, Result};
pub use factory::ClientFactory;
pub use manager::StorageManager;
pub use scan::{ScanHandle, ScanOptions, Scanner};
