//! Shared configuration library for Fathom.
//!
//! This crate centralizes storage-root definitions and runtime tuning for the
//! resilience stack, scanner, watcher, and health monitor, plus the loader
//! that resolves configuration from the environment or from files. Both the
//! core library and embedding services consume these models so there is a
//! single source of truth for defaults and validation rules.

pub mod error;
pub mod models;

pub use error::{ConfigError, Result};
pub use models::storage_root::{Secret, StorageRootConfig};
pub use models::tuning::{
    BreakerConfig, CacheConfig, HealthConfig, ResilienceConfig, RetryConfig,
    ScannerConfig, WatchConfig,
};
pub use models::{ConfigSource, FathomConfig};
