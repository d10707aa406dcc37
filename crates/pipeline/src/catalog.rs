//! Model catalog: the selectable models and where each one runs.
//!
//! A model id (`sora-2@sutu`) is what priority lists and health records
//! talk about. The catalog maps it to the adapter that serves it and the
//! model name that adapter sends upstream. A model is available exactly
//! when it is in the catalog.

use std::collections::{BTreeMap, HashSet};

use genflow_core::error::CoreError;
use genflow_core::types::{Category, ModelId, ProviderKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: ModelId,
    pub category: Category,
    pub provider: ProviderKind,
    /// Model name in the provider's own vocabulary.
    pub provider_model: String,
}

impl ModelSpec {
    pub fn new(
        id: impl Into<ModelId>,
        category: Category,
        provider: ProviderKind,
        provider_model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            provider,
            provider_model: provider_model.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    models: Vec<ModelSpec>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate ids. Declaration order is the
    /// default preference order.
    pub fn new(models: Vec<ModelSpec>) -> Result<Self, CoreError> {
        let mut seen = HashSet::new();
        for model in &models {
            if !seen.insert(model.id.as_str()) {
                return Err(CoreError::Conflict(format!(
                    "Model '{}' is listed twice in the catalog",
                    model.id
                )));
            }
        }
        Ok(Self { models })
    }

    /// The built-in models.
    pub fn builtin() -> Self {
        Self {
            models: vec![
                ModelSpec::new("sora-2@sutu", Category::Video, ProviderKind::Sutu, "sora-2"),
                ModelSpec::new("sora-2@yunwu", Category::Video, ProviderKind::Yunwu, "sora-2"),
                ModelSpec::new(
                    "sora-2-pro@dayu",
                    Category::Video,
                    ProviderKind::Dayu,
                    "sora-2-pro",
                ),
                ModelSpec::new(
                    "sora-2@kie",
                    Category::Video,
                    ProviderKind::Kie,
                    "sora-2-text-to-video",
                ),
                ModelSpec::new("kling-2@yijia", Category::Video, ProviderKind::Yijia, "kling-v2"),
                ModelSpec::new(
                    "seedream-4@kie",
                    Category::Image,
                    ProviderKind::Kie,
                    "bytedance/seedream-v4-text-to-image",
                ),
            ],
        }
    }

    pub fn get(&self, model_id: &str) -> Result<&ModelSpec, CoreError> {
        self.models
            .iter()
            .find(|m| m.id == model_id)
            .ok_or_else(|| CoreError::NotFound {
                entity: "model",
                id: model_id.to_string(),
            })
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    /// Model ids of `category`, in declaration order.
    pub fn available(&self, category: Category) -> Vec<ModelId> {
        self.models
            .iter()
            .filter(|m| m.category == category)
            .map(|m| m.id.clone())
            .collect()
    }

    /// Available ids for every category that has at least one model.
    pub fn available_by_category(&self) -> BTreeMap<Category, Vec<ModelId>> {
        let mut map: BTreeMap<Category, Vec<ModelId>> = BTreeMap::new();
        for model in &self.models {
            map.entry(model.category).or_default().push(model.id.clone());
        }
        map
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn builtin_ids_are_unique() {
        let builtin = Catalog::builtin();
        assert!(Catalog::new(builtin.models().to_vec()).is_ok());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let spec = ModelSpec::new("m", Category::Video, ProviderKind::Sutu, "m");
        assert_matches!(
            Catalog::new(vec![spec.clone(), spec]),
            Err(CoreError::Conflict(_))
        );
    }

    #[test]
    fn available_filters_by_category_in_order() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.available(Category::Image), vec!["seedream-4@kie".to_string()]);
        assert_eq!(catalog.available(Category::Video)[0], "sora-2@sutu");
        assert!(catalog.available(Category::Audio).is_empty());
        assert!(!catalog.available_by_category().contains_key(&Category::Audio));
    }

    #[test]
    fn unknown_model_is_not_found() {
        assert_matches!(
            Catalog::builtin().get("dall-e@nowhere"),
            Err(CoreError::NotFound { entity: "model", .. })
        );
    }
}
