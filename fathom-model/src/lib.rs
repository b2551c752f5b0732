//! Core data model definitions shared across Fathom crates.
#![allow(missing_docs)]

pub mod change;
pub mod error;
pub mod health;
pub mod ids;
pub mod prelude;
pub mod protocol;
pub mod provenance;
pub mod record;
pub mod scan;

// Intentionally curated re-exports for downstream consumers.
pub use change::{ChangeEvent, ChangeKind};
pub use error::{ModelError, Result as ModelResult};
pub use health::{ConnectionState, HealthReport};
pub use ids::{RootId, ScanId};
pub use protocol::Protocol;
pub use provenance::{Provenance, Sourced};
pub use record::{FileKind, FileRecord};
pub use scan::{ScanError, ScanReport};
