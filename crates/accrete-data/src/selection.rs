//! Entity selection and universes.

use crate::model::EntityId;
use serde::{Deserialize, Serialize};

/// Trait for entity universes.
pub trait EntityUniverse {
    /// Get all entity ids in the universe.
    fn entity_ids(&self) -> Vec<String>;

    /// Check if an entity is in the universe.
    fn contains(&self, entity_id: &str) -> bool {
        self.entity_ids().iter().any(|id| id == entity_id)
    }

    /// Get the number of entities.
    fn size(&self) -> usize {
        self.entity_ids().len()
    }
}

impl EntityUniverse for Vec<String> {
    fn entity_ids(&self) -> Vec<String> {
        self.clone()
    }
}

/// Criteria selecting entities out of a universe.
///
/// Empty criteria select everything. Each non-empty criterion narrows the selection;
/// `codes`, `exchanges` and `entity_type` match against the parts of
/// `{entity_type}_{exchange}_{code}` ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySelection {
    /// Explicit entity ids
    pub entity_ids: Vec<String>,
    /// Exchange-local codes
    pub codes: Vec<String>,
    /// Exchanges
    pub exchanges: Vec<String>,
    /// Entity type
    pub entity_type: Option<String>,
}

impl EntitySelection {
    /// Select explicit entity ids.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Whether no criterion is set.
    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
            && self.codes.is_empty()
            && self.exchanges.is_empty()
            && self.entity_type.is_none()
    }

    /// Whether one entity id satisfies every criterion.
    pub fn matches(&self, entity_id: &str) -> bool {
        if !self.entity_ids.is_empty() && !self.entity_ids.iter().any(|id| id == entity_id) {
            return false;
        }
        if self.codes.is_empty() && self.exchanges.is_empty() && self.entity_type.is_none() {
            return true;
        }
        let Ok(parsed) = entity_id.parse::<EntityId>() else {
            return false;
        };
        (self.codes.is_empty() || self.codes.contains(&parsed.code))
            && (self.exchanges.is_empty() || self.exchanges.contains(&parsed.exchange))
            && self
                .entity_type
                .as_ref()
                .is_none_or(|t| *t == parsed.entity_type)
    }

    /// Resolve the selection against a universe. The result is sorted and deduplicated.
    pub fn resolve<U: EntityUniverse + ?Sized>(&self, universe: &U) -> Vec<String> {
        let mut ids: Vec<String> = universe
            .entity_ids()
            .into_iter()
            .filter(|id| self.matches(id))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> Vec<String> {
        vec![
            "stock_sz_000002".to_string(),
            "stock_sz_000001".to_string(),
            "stock_sh_600000".to_string(),
            "index_sh_000001".to_string(),
        ]
    }

    #[test]
    fn test_universe_trait() {
        let universe = universe();
        assert!(universe.contains("stock_sz_000001"));
        assert!(!universe.contains("stock_sz_999999"));
        assert_eq!(universe.size(), 4);
    }

    #[test]
    fn test_empty_selection_selects_all_sorted() {
        let selection = EntitySelection::default();
        assert!(selection.is_empty());
        let ids = selection.resolve(&universe());
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], "index_sh_000001");
    }

    #[test]
    fn test_selection_by_parts() {
        let selection = EntitySelection {
            codes: vec!["000001".to_string()],
            entity_type: Some("stock".to_string()),
            ..Default::default()
        };
        assert_eq!(selection.resolve(&universe()), vec!["stock_sz_000001".to_string()]);

        let selection = EntitySelection {
            exchanges: vec!["sh".to_string()],
            ..Default::default()
        };
        assert_eq!(selection.resolve(&universe()).len(), 2);
    }

    #[test]
    fn test_selection_by_ids_ignores_unknown() {
        let selection = EntitySelection::ids(["stock_sz_000001", "stock_sz_999999"]);
        assert_eq!(selection.resolve(&universe()), vec!["stock_sz_000001".to_string()]);
    }
}
