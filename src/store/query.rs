// src/store/query.rs
//! Read-side filters and orderings over active listings.
//!
//! Both stores evaluate a [`ListingQuery`] the same way: exact match on
//! location and organization, a case-sensitive substring match of the
//! keyword in title or description, and inclusive salary bounds where an
//! absent bound never matches a filter on it.

use clap::ValueEnum;
use serde::Serialize;
use std::cmp::Ordering;

use crate::listing::{CanonicalRecord, PersistedListing};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingQuery {
    pub location: Option<String>,
    pub organization: Option<String>,
    pub keyword: Option<String>,
    /// Lower salary bound must be at least this.
    pub min_compensation: Option<i64>,
    /// Upper salary bound must be at most this.
    pub max_compensation: Option<i64>,
    pub sort: ListingSort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListingSort {
    /// Newest publish date first.
    #[default]
    Newest,
    Oldest,
    /// Highest upper bound first (lower bound when no upper).
    SalaryDesc,
    /// Lowest lower bound first (upper bound when no lower).
    SalaryAsc,
    Company,
    City,
}

impl ListingQuery {
    pub fn matches(&self, r: &CanonicalRecord) -> bool {
        fn eq(want: &Option<String>, have: &Option<String>) -> bool {
            want.as_ref().map_or(true, |w| have.as_ref() == Some(w))
        }

        eq(&self.location, &r.location)
            && eq(&self.organization, &r.organization)
            && self.keyword.as_deref().map_or(true, |k| {
                r.title.as_deref().is_some_and(|t| t.contains(k))
                    || r.description.as_deref().is_some_and(|d| d.contains(k))
            })
            && self
                .min_compensation
                .map_or(true, |min| r.compensation_min.is_some_and(|v| v >= min))
            && self
                .max_compensation
                .map_or(true, |max| r.compensation_max.is_some_and(|v| v <= max))
    }
}

impl ListingSort {
    /// SQL `ORDER BY` body for the `listing` table.
    pub(crate) fn order_by(self) -> &'static str {
        match self {
            ListingSort::Newest => "published_at DESC, id ASC",
            ListingSort::Oldest => "published_at ASC, id ASC",
            ListingSort::SalaryDesc => {
                "COALESCE(compensation_max, compensation_min) DESC NULLS LAST, id ASC"
            }
            ListingSort::SalaryAsc => {
                "COALESCE(compensation_min, compensation_max) ASC NULLS LAST, id ASC"
            }
            ListingSort::Company => "organization ASC NULLS LAST, id ASC",
            ListingSort::City => "location ASC NULLS LAST, id ASC",
        }
    }

    /// In-process equivalent of [`order_by`](Self::order_by).
    pub(crate) fn compare(self, a: &PersistedListing, b: &PersistedListing) -> Ordering {
        let (ra, rb) = (&a.record, &b.record);
        let primary = match self {
            ListingSort::Newest => rb.published_at.cmp(&ra.published_at),
            ListingSort::Oldest => ra.published_at.cmp(&rb.published_at),
            ListingSort::SalaryDesc => nulls_last(
                ra.compensation_max.or(ra.compensation_min),
                rb.compensation_max.or(rb.compensation_min),
                true,
            ),
            ListingSort::SalaryAsc => nulls_last(
                ra.compensation_min.or(ra.compensation_max),
                rb.compensation_min.or(rb.compensation_max),
                false,
            ),
            ListingSort::Company => {
                nulls_last(ra.organization.as_ref(), rb.organization.as_ref(), false)
            }
            ListingSort::City => nulls_last(ra.location.as_ref(), rb.location.as_ref(), false),
        };
        primary.then(a.id.cmp(&b.id))
    }
}

fn nulls_last<T: Ord>(a: Option<T>, b: Option<T>, desc: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) if desc => b.cmp(&a),
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Active listing count and mean salary bounds for one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationStats {
    pub location: Option<String>,
    pub count: usize,
    pub avg_compensation_min: Option<f64>,
    pub avg_compensation_max: Option<f64>,
}
