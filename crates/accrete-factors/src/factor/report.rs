//! Lifecycle and outcome of factor computations.

use derive_more::Display;
use serde::Serialize;
use std::fmt;

/// Lifecycle of a [`Factor`](crate::factor::Factor).
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorPhase {
    /// Constructed, nothing loaded
    #[default]
    #[display("created")]
    Created,
    /// Persisted results and state loaded, or wiped
    #[display("loaded")]
    Loaded,
    /// Running the pipeline
    #[display("computing")]
    Computing,
    /// New results and state written
    #[display("persisted")]
    Persisted,
    /// Results available; more rows may be computed
    #[display("ready")]
    Ready,
}

/// An entity whose computation or persistence failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    /// Failed entity
    pub entity_id: String,
    /// What went wrong
    pub reason: String,
}

/// Per-entity outcome of one compute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComputeReport {
    /// Entities that received new rows
    pub computed: Vec<String>,
    /// Entities without new rows
    pub up_to_date: Vec<String>,
    /// Entities without enough rows to produce any output yet
    pub insufficient: Vec<String>,
    /// Entities recomputed from scratch after their state was found corrupted
    pub restarted: Vec<String>,
    /// Entities that timed out waiting for new bars and were computed on stale data
    pub stale: Vec<String>,
    /// Entities whose computation or persistence failed
    pub failed: Vec<EntityFailure>,
}

impl ComputeReport {
    /// Whether no entity failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Record a failure.
    pub fn fail(&mut self, entity_id: &str, reason: impl fmt::Display) {
        self.failed.push(EntityFailure {
            entity_id: entity_id.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Whether an entity is listed as failed.
    pub fn has_failed(&self, entity_id: &str) -> bool {
        self.failed.iter().any(|f| f.entity_id == entity_id)
    }
}

impl fmt::Display for ComputeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "computed:     {}", self.computed.join(", "))?;
        writeln!(f, "up to date:   {}", self.up_to_date.join(", "))?;
        writeln!(f, "insufficient: {}", self.insufficient.join(", "))?;
        writeln!(f, "restarted:    {}", self.restarted.join(", "))?;
        writeln!(f, "stale:        {}", self.stale.join(", "))?;
        write!(f, "failed:       ")?;
        for (i, failure) in self.failed.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} ({})", failure.entity_id, failure.reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report() {
        let mut report = ComputeReport::default();
        assert!(report.is_success());
        report.computed.push("a".to_string());
        report.fail("b", "disk full");
        assert!(!report.is_success());
        assert!(report.has_failed("b"));
        assert!(report.to_string().contains("b (disk full)"));
        assert_eq!(FactorPhase::default().to_string(), "created");
    }
}
