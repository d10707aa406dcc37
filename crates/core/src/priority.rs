//! Per-category model preference and health-aware selection.
//!
//! A persisted preference list is always merged against the models that are
//! actually available before use: stale ids are dropped, newly available ids
//! are appended, and the surviving ids keep their relative order.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::health::HealthView;
use crate::types::{Category, ModelId};

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge a persisted preference order with the currently available models.
///
/// Duplicates in either input are collapsed to their first occurrence.
pub fn merge_priority_list(persisted: &[ModelId], available: &[ModelId]) -> Vec<ModelId> {
    let available_set: HashSet<&str> = available.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(available.len());
    let mut merged = Vec::with_capacity(available.len());

    for id in persisted {
        if available_set.contains(id.as_str()) && seen.insert(id.as_str()) {
            merged.push(id.clone());
        }
    }
    for id in available {
        if seen.insert(id.as_str()) {
            merged.push(id.clone());
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// PriorityLists
// ---------------------------------------------------------------------------

/// Ordered model preference for every category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityLists {
    lists: BTreeMap<Category, Vec<ModelId>>,
}

impl PriorityLists {
    /// Build merged lists from persisted preferences and the available set.
    ///
    /// Categories with available models but no persisted list get the
    /// available order; persisted categories with no available models end up
    /// empty.
    pub fn merged(
        persisted: &BTreeMap<Category, Vec<ModelId>>,
        available: &BTreeMap<Category, Vec<ModelId>>,
    ) -> Self {
        let mut lists = BTreeMap::new();
        for category in Category::ALL {
            let stored = persisted.get(&category).map(Vec::as_slice).unwrap_or(&[]);
            let live = available.get(&category).map(Vec::as_slice).unwrap_or(&[]);
            let merged = merge_priority_list(stored, live);
            if !merged.is_empty() {
                lists.insert(category, merged);
            }
        }
        Self { lists }
    }

    pub fn get(&self, category: Category) -> &[ModelId] {
        self.lists.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace one category's order, merged against `available`.
    pub fn set(&mut self, category: Category, order: &[ModelId], available: &[ModelId]) {
        let merged = merge_priority_list(order, available);
        if merged.is_empty() {
            self.lists.remove(&category);
        } else {
            self.lists.insert(category, merged);
        }
    }

    /// Plain map form, for persistence.
    pub fn to_map(&self) -> BTreeMap<Category, Vec<ModelId>> {
        self.lists.clone()
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Result of choosing a model for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub model_id: ModelId,
    /// Every candidate was unhealthy; `model_id` is the most preferred one
    /// anyway.
    pub degraded: bool,
    /// Unhealthy models passed over before `model_id`.
    pub skipped: Vec<ModelId>,
}

/// Pick the first healthy model in `list`, failing open to the head of the
/// list when none is healthy. `None` only for an empty list.
pub fn select_model(list: &[ModelId], health: &HealthView) -> Option<Selection> {
    let head = list.first()?;
    let mut skipped = Vec::new();
    for id in list {
        if health.is_healthy(id) {
            return Some(Selection {
                model_id: id.clone(),
                degraded: false,
                skipped,
            });
        }
        skipped.push(id.clone());
    }
    Some(Selection {
        model_id: head.clone(),
        degraded: true,
        skipped: Vec::new(),
    })
}

/// Every model in try-order: healthy ones by preference, then unhealthy
/// ones by preference.
pub fn candidate_order(list: &[ModelId], health: &HealthView) -> Vec<ModelId> {
    let (healthy, unhealthy): (Vec<&ModelId>, Vec<&ModelId>) =
        list.iter().partition(|id| health.is_healthy(id));
    healthy.into_iter().chain(unhealthy).cloned().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
