//! Consumer-facing snapshot of the types surface.
//! Prefer importing from this module instead of individual tree nodes when
//! working in catalog or presentation layers.

pub use super::change::{ChangeEvent, ChangeKind};
pub use super::error::{ModelError, Result as ModelResult};
pub use super::health::{ConnectionState, HealthReport};
pub use super::ids::{RootId, ScanId};
pub use super::protocol::Protocol;
pub use super::provenance::{Provenance, Sourced};
pub use super::record::{FileKind, FileRecord};
pub use super::scan::{ScanError, ScanReport};
