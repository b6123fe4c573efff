//! # Listing model
//!
//! `CanonicalRecord` is what every source provider maps its JSON into.
//! `PersistedListing` adds the lifecycle fields a store keeps, and
//! `ChangeLogEntry` is the append-only audit record of one transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned listing id. Stable across updates.
pub type ListingId = i64;

/// One normalized listing as produced by a source provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalRecord {
    /// Natural key (the source's canonical URL).
    pub identity_key: String,
    pub title: Option<String>,
    pub organization: Option<String>,
    pub location: Option<String>,
    pub compensation_min: Option<i64>,
    pub compensation_max: Option<i64>,
    pub currency: Option<String>,
    pub schedule: Option<String>,
    pub published_at: DateTime<Utc>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub source_name: String,
    pub source_ref: String,
}

impl CanonicalRecord {
    /// Minimal record with only the required fields set. Providers fill the rest.
    pub fn new(
        identity_key: impl Into<String>,
        source_name: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        let identity_key = identity_key.into();
        Self {
            source_ref: identity_key.clone(),
            identity_key,
            title: None,
            organization: None,
            location: None,
            compensation_min: None,
            compensation_max: None,
            currency: None,
            schedule: None,
            published_at,
            description: None,
            requirements: None,
            source_name: source_name.into(),
        }
    }

    pub fn snapshot(&self) -> FieldSnapshot {
        FieldSnapshot {
            title: self.title.clone(),
            organization: self.organization.clone(),
            location: self.location.clone(),
            compensation_min: self.compensation_min,
            compensation_max: self.compensation_max,
            currency: self.currency.clone(),
            published_at: Some(self.published_at),
            schedule: self.schedule.clone(),
        }
    }

    /// True when neither compensation bound is known.
    pub fn compensation_unspecified(&self) -> bool {
        self.compensation_min.is_none() && self.compensation_max.is_none()
    }
}

/// A canonical record plus the lifecycle state kept by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedListing {
    pub id: ListingId,
    #[serde(flatten)]
    pub record: CanonicalRecord,
    pub is_active: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "ADDED",
            ChangeKind::Updated => "UPDATED",
            ChangeKind::Removed => "REMOVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ADDED" => Some(ChangeKind::Added),
            "UPDATED" => Some(ChangeKind::Updated),
            "REMOVED" => Some(ChangeKind::Removed),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Canonical fields captured at the moment of a transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSnapshot {
    pub title: Option<String>,
    pub organization: Option<String>,
    pub location: Option<String>,
    pub compensation_min: Option<i64>,
    pub compensation_max: Option<i64>,
    pub currency: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub schedule: Option<String>,
}

/// Write-once audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub listing_id: Option<ListingId>,
    pub identity_key: String,
    pub kind: ChangeKind,
    pub event_time: DateTime<Utc>,
    pub snapshot: FieldSnapshot,
}
