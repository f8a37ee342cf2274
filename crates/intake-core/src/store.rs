use crate::error::IntakeError;
use crate::sections::SectionCatalog;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Section id → current payload.
pub type FormData = BTreeMap<String, Value>;

/// Per-section payload store.
///
/// Payloads are trusted as already validated by the submitting section controller.
/// Updates are shallow merges: top-level fields present in the partial payload replace
/// the stored ones and absent fields keep their prior values.
#[derive(Debug, Clone)]
pub struct FormStore {
    catalog: Arc<SectionCatalog>,
    data: FormData,
}

impl FormStore {
    pub fn new(catalog: Arc<SectionCatalog>) -> Self {
        let data = default_form_data(&catalog);
        Self { catalog, data }
    }

    /// Restore from persisted data. Unknown sections are dropped and missing ones defaulted.
    pub fn from_data(catalog: Arc<SectionCatalog>, mut persisted: FormData) -> Self {
        let data = catalog
            .sections()
            .iter()
            .map(|section| {
                let payload = persisted
                    .remove(&section.id)
                    .unwrap_or_else(|| section.default_payload.clone());
                (section.id.clone(), payload)
            })
            .collect();
        Self { catalog, data }
    }

    pub fn catalog(&self) -> &SectionCatalog {
        &self.catalog
    }

    pub fn data(&self) -> &FormData {
        &self.data
    }

    pub fn get(&self, id: &str) -> Result<&Value, IntakeError> {
        self.data
            .get(id)
            .ok_or_else(|| IntakeError::UnknownSection(id.to_string()))
    }

    pub fn update(&mut self, id: &str, partial: Value) -> Result<&Value, IntakeError> {
        let current = self
            .data
            .get_mut(id)
            .ok_or_else(|| IntakeError::UnknownSection(id.to_string()))?;
        merge_shallow(current, partial);
        Ok(current)
    }

    pub fn reset(&mut self) {
        self.data = default_form_data(&self.catalog);
    }
}

fn default_form_data(catalog: &SectionCatalog) -> FormData {
    catalog
        .sections()
        .iter()
        .map(|section| (section.id.clone(), section.default_payload.clone()))
        .collect()
}

fn merge_shallow(current: &mut Value, partial: Value) {
    match (current, partial) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                existing.insert(key, value);
            }
        }
        (slot, replacement) => {
            *slot = replacement;
        }
    }
}
