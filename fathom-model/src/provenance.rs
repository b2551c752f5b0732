use chrono::{DateTime, Utc};

/// Where a result came from: the live backend, or the offline snapshot
/// cache after the backend failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "origin", rename_all = "lowercase"))]
pub enum Provenance {
    Live,
    Cached { fetched_at: DateTime<Utc> },
}

impl Provenance {
    pub fn is_stale(&self) -> bool {
        matches!(self, Provenance::Cached { .. })
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Provenance::Live => None,
            Provenance::Cached { fetched_at } => Some(*fetched_at),
        }
    }
}

/// A value tagged with its [`Provenance`]. List and stat results travel in
/// this wrapper so callers can tell a live answer from a stale snapshot.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sourced<T> {
    pub value: T,
    pub provenance: Provenance,
}

impl<T> Sourced<T> {
    pub fn live(value: T) -> Self {
        Sourced {
            value,
            provenance: Provenance::Live,
        }
    }

    pub fn cached(value: T, fetched_at: DateTime<Utc>) -> Self {
        Sourced {
            value,
            provenance: Provenance::Cached { fetched_at },
        }
    }

    pub fn is_stale(&self) -> bool {
        self.provenance.is_stale()
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            provenance: self.provenance,
        }
    }
}

impl<T> AsRef<T> for Sourced<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
