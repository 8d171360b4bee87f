//! Control registry - index of all available controls

use crate::control::Control;
use pgstig_core::{Error, Result, Severity};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Which controls a run should evaluate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Explicit control ids; unknown ids are an error
    pub ids: Vec<String>,
    /// Keep controls carrying any of these tags
    pub tags: Vec<String>,
    pub min_severity: Option<Severity>,
}

impl Selection {
    /// Every registered control
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }
}

/// Registry of controls, ordered by id
#[derive(Default)]
pub struct ControlRegistry {
    controls: BTreeMap<String, Arc<dyn Control>>,
}

impl ControlRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a control; identifiers are unique
    pub fn register(&mut self, control: Arc<dyn Control>) -> Result<()> {
        let id = control.id().to_string();
        if self.controls.contains_key(&id) {
            return Err(Error::DuplicateControl { control_id: id });
        }
        debug!(control = %id, "Registered control");
        self.controls.insert(id, control);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Control>> {
        self.controls.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Resolve a selection into controls sorted by id. Tag and severity
    /// filters apply on top of explicit ids.
    pub fn select(&self, selection: &Selection) -> Result<Vec<Arc<dyn Control>>> {
        if let Some(unknown) = selection.ids.iter().find(|id| !self.controls.contains_key(*id)) {
            return Err(Error::ControlNotFound {
                control_id: unknown.clone(),
            });
        }

        Ok(self
            .controls
            .values()
            .filter(|c| selection.ids.is_empty() || selection.ids.iter().any(|id| id == c.id()))
            .filter(|c| {
                selection.tags.is_empty()
                    || selection.tags.iter().any(|t| c.metadata().has_tag(t))
            })
            .filter(|c| {
                selection
                    .min_severity
                    .map(|min| c.metadata().severity >= min)
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }
}

impl std::fmt::Debug for ControlRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlRegistry")
            .field("controls", &self.controls.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlContext, ControlMetadata};
    use crate::evaluation::Evaluation;
    use async_trait::async_trait;

    struct Stub(ControlMetadata);

    #[async_trait]
    impl Control for Stub {
        fn metadata(&self) -> &ControlMetadata {
            &self.0
        }

        async fn evaluate(&self, _ctx: &ControlContext, _eval: &mut Evaluation) -> Result<()> {
            Ok(())
        }
    }

    fn stub(id: &str, impact: f32, label: &str) -> Arc<dyn Control> {
        Arc::new(Stub(
            ControlMetadata::new(id, "stub", impact).with_label(label),
        ))
    }

    fn registry() -> ControlRegistry {
        let mut registry = ControlRegistry::new();
        registry.register(stub("SV-3", 0.5, "auditing")).unwrap();
        registry.register(stub("SV-1", 0.7, "authentication")).unwrap();
        registry.register(stub("SV-2", 0.5, "auditing")).unwrap();
        registry
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = registry();
        let err = registry.register(stub("SV-1", 0.5, "x")).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_CONTROL");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_select_all_sorted() {
        let selected = registry().select(&Selection::all()).unwrap();
        let ids: Vec<&str> = selected.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["SV-1", "SV-2", "SV-3"]);
    }

    #[test]
    fn test_select_ids_sorted_once() {
        let selection = Selection::all().with_ids(["SV-3", "SV-1", "SV-3"]);
        let selected = registry().select(&selection).unwrap();
        let ids: Vec<&str> = selected.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["SV-1", "SV-3"]);
    }

    #[test]
    fn test_select_unknown_id() {
        let err = registry()
            .select(&Selection::all().with_ids(["SV-9"]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::ControlNotFound { ref control_id } if control_id == "SV-9"));
    }

    #[test]
    fn test_filters() {
        let registry = registry();
        let selection = Selection::all().with_tag("auditing");
        assert_eq!(registry.select(&selection).unwrap().len(), 2);

        let selection = Selection::all()
            .with_tag("auditing")
            .with_min_severity(Severity::Medium);
        assert_eq!(registry.select(&selection).unwrap().len(), 2);

        let selection = Selection::all().with_min_severity(Severity::High);
        assert_eq!(registry.select(&selection).unwrap()[0].id(), "SV-1");
    }
}
