//! Attribute filters and their wire format.
//!
//! A filter is four criteria sets, one per alert dimension. An empty set is a
//! wildcard for its dimension; a filter matches when every dimension does.
//! Raw payloads are validated once, when they are parsed into
//! `FilterCriteria`, so matching itself can never fail.

use crate::core::{Alert, ObjectTypeId, ParentObjectId, ProblemTypeId, SourceId, UserId};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeSet;

/// The exact JSON shape accepted for a filter specification.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct FilterSpec {
    source_ids: Vec<SourceId>,
    object_type_ids: Vec<ObjectTypeId>,
    parent_object_ids: Vec<ParentObjectId>,
    problem_type_ids: Vec<ProblemTypeId>,
}

/// Validated criteria sets for the four alert dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub source_ids: BTreeSet<SourceId>,
    pub object_type_ids: BTreeSet<ObjectTypeId>,
    pub parent_object_ids: BTreeSet<ParentObjectId>,
    pub problem_type_ids: BTreeSet<ProblemTypeId>,
}

impl FilterCriteria {
    /// Criteria that match every alert.
    pub fn any() -> Self {
        Self::default()
    }

    /// Parses a filter specification from its JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::InvalidFilterSpec(e.to_string()))?;
        Self::from_value(value)
    }

    /// Parses a filter specification from an already decoded JSON value.
    ///
    /// The value must be an object with exactly the keys `sourceIds`,
    /// `objectTypeIds`, `parentObjectIds` and `problemTypeIds`, each an array
    /// of non-negative integers.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        // serde would also accept a positional array for a struct.
        if !value.is_object() {
            return Err(Error::InvalidFilterSpec("expected a JSON object".to_string()));
        }
        let spec: FilterSpec =
            serde_json::from_value(value).map_err(|e| Error::InvalidFilterSpec(e.to_string()))?;
        Ok(Self {
            source_ids: spec.source_ids.into_iter().collect(),
            object_type_ids: spec.object_type_ids.into_iter().collect(),
            parent_object_ids: spec.parent_object_ids.into_iter().collect(),
            problem_type_ids: spec.problem_type_ids.into_iter().collect(),
        })
    }

    /// The wire representation of these criteria.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "sourceIds": self.source_ids,
            "objectTypeIds": self.object_type_ids,
            "parentObjectIds": self.parent_object_ids,
            "problemTypeIds": self.problem_type_ids,
        })
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Whether `alert` satisfies every dimension.
    pub fn matches(&self, alert: &Alert) -> bool {
        dimension_matches(&self.source_ids, Some(alert.source))
            && dimension_matches(&self.object_type_ids, Some(alert.object_type))
            && dimension_matches(&self.parent_object_ids, alert.parent_object)
            && dimension_matches(&self.problem_type_ids, Some(alert.problem_type))
    }

    /// Lazily yields the alerts satisfying `matches`, in input order.
    pub fn filtered<'a, I>(&'a self, alerts: I) -> impl Iterator<Item = &'a Alert> + 'a
    where
        I: IntoIterator<Item = &'a Alert>,
        I::IntoIter: 'a,
    {
        alerts.into_iter().filter(move |alert| self.matches(alert))
    }
}

/// An empty criteria set accepts anything, including a missing value.
fn dimension_matches(criteria: &BTreeSet<u64>, value: Option<u64>) -> bool {
    if criteria.is_empty() {
        return true;
    }
    value.is_some_and(|v| criteria.contains(&v))
}

/// A named, user-owned filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeFilter {
    pub id: u64,
    pub owner: UserId,
    /// Unique per owner.
    pub name: String,
    pub criteria: FilterCriteria,
}

impl AttributeFilter {
    pub fn new(id: u64, owner: UserId, name: impl Into<String>, criteria: FilterCriteria) -> Self {
        Self {
            id,
            owner,
            name: name.into(),
            criteria,
        }
    }

    /// Builds a filter from a raw specification, failing fast on bad input.
    pub fn parse(id: u64, owner: UserId, name: impl Into<String>, spec: &str) -> Result<Self> {
        Ok(Self::new(id, owner, name, FilterCriteria::from_json(spec)?))
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.criteria.matches(alert)
    }

    pub fn filtered<'a, I>(&'a self, alerts: I) -> impl Iterator<Item = &'a Alert> + 'a
    where
        I: IntoIterator<Item = &'a Alert>,
        I::IntoIter: 'a,
    {
        self.criteria.filtered(alerts)
    }
}
