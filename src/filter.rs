// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter state for bulk loads.
//!
//! A [`FilterSet`] describes "what matches right now" for one list
//! controller. Two filter sets are the same query when their normalized
//! [identity keys](FilterSet::identity_key) are equal, regardless of how
//! the values were assembled; controllers compare keys, not instances, so
//! rebuilding an identical filter never triggers a redundant load.
//!
//! # Example
//!
//! ```
//! use record_sync::FilterSet;
//!
//! let mut a = FilterSet::default();
//! a.add_facet("stato", "Nuovo");
//! a.add_facet("stato", "Attivo");
//! a.search = Some("rossi".into());
//!
//! let mut b = FilterSet::default();
//! b.search = Some("rossi".into());
//! b.add_facet("stato", "Nuovo");
//! b.add_facet("stato", "Attivo");
//!
//! // Distinct instances, identical query.
//! assert_eq!(a.identity_key(), b.identity_key());
//! ```

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Filter state driving one canonical collection's bulk load.
///
/// Facets are multi-value (e.g. several lead states at once); the map is
/// ordered so the identity key is stable under insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterSet {
    /// Multi-value facet filters, keyed by server-side field name.
    pub facets: BTreeMap<String, Vec<String>>,
    /// Free-text search.
    pub search: Option<String>,
    /// Inclusive date-range bounds (ISO-8601 dates, server-interpreted).
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
}

impl FilterSet {
    pub fn add_facet(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.facets.entry(field.into()).or_default().push(value.into());
    }

    /// Normalized serialized identity of this filter set.
    ///
    /// Array facets are joined to a single string per field; absent fields
    /// serialize to nothing. Equal keys mean "same query" for memoization.
    #[must_use]
    pub fn identity_key(&self) -> String {
        let mut key = String::new();
        for (field, values) in &self.facets {
            if values.is_empty() {
                continue;
            }
            key.push_str(field);
            key.push('=');
            key.push_str(&values.join(","));
            key.push(';');
        }
        for (name, value) in [
            ("search", &self.search),
            ("dateFrom", &self.date_from),
            ("dateTo", &self.date_to),
            ("sortField", &self.sort_field),
        ] {
            if let Some(value) = value {
                key.push_str(name);
                key.push('=');
                key.push_str(value);
                key.push(';');
            }
        }
        key.push_str("sortDirection=");
        key.push_str(self.sort_direction.as_str());
        key
    }

    /// Query parameters for the bulk-load request, repeated per facet value.
    #[must_use]
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        for (field, values) in &self.facets {
            for value in values {
                params.push((field.clone(), value.clone()));
            }
        }
        if let Some(ref search) = self.search {
            params.push(("search".into(), search.clone()));
        }
        if let Some(ref from) = self.date_from {
            params.push(("dateFrom".into(), from.clone()));
        }
        if let Some(ref to) = self.date_to {
            params.push(("dateTo".into(), to.clone()));
        }
        if let Some(ref field) = self.sort_field {
            params.push(("sortField".into(), field.clone()));
        }
        params.push(("sortDirection".into(), self.sort_direction.as_str().into()));
        params
    }
}
