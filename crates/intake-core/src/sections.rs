//! Ordered section catalog.
//!
//! The catalog is fixed at startup: positions never change at runtime and every other
//! component addresses sections either by id or by ordinal index into this list.

use crate::error::IntakeError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

/// One ordered unit of the intake workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionSpec {
    pub id: String,
    pub title: String,
    /// Empty payload a section is restored to on reset.
    pub default_payload: Value,
    /// Whether the section contributes to the content fingerprint.
    pub fingerprinted: bool,
}

impl SectionSpec {
    pub fn new(id: impl Into<String>, title: impl Into<String>, default_payload: Value) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            default_payload,
            fingerprinted: false,
        }
    }

    pub fn fingerprinted(mut self) -> Self {
        self.fingerprinted = true;
        self
    }
}

/// Immutable ordered list of sections.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionCatalog {
    sections: Vec<SectionSpec>,
}

impl SectionCatalog {
    pub fn new(sections: Vec<SectionSpec>) -> Result<Self, IntakeError> {
        if sections.is_empty() {
            return Err(IntakeError::InvalidCatalog(
                "catalog must contain at least one section".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for section in &sections {
            if section.id.trim().is_empty() {
                return Err(IntakeError::InvalidCatalog(
                    "section id must not be empty".to_string(),
                ));
            }
            if !seen.insert(section.id.as_str()) {
                return Err(IntakeError::InvalidCatalog(format!(
                    "duplicate section id '{}'",
                    section.id
                )));
            }
            if !section.default_payload.is_object() {
                return Err(IntakeError::InvalidCatalog(format!(
                    "default payload of '{}' must be an object",
                    section.id
                )));
            }
        }

        Ok(Self { sections })
    }

    /// The built-in application catalog.
    ///
    /// Six data sections feed the fingerprint. Pricing, appointment and the terminal
    /// overview are chosen after the attested data and never affect it.
    pub fn application() -> Self {
        let sections = vec![
            SectionSpec::new(
                "personal_info",
                "Personal information",
                json!({
                    "full_name": "",
                    "gender": "",
                    "date_of_birth": null,
                    "nationality": "",
                    "id_number": "",
                }),
            )
            .fingerprinted(),
            SectionSpec::new(
                "contact_details",
                "Contact details",
                json!({
                    "email": "",
                    "phone": "",
                    "address": {
                        "line1": "",
                        "city": "",
                        "postal_code": "",
                        "country": "",
                    },
                }),
            )
            .fingerprinted(),
            SectionSpec::new(
                "medical_history",
                "Medical history",
                json!({
                    "conditions": [],
                    "medications": [],
                    "allergies": [],
                    "last_checkup": null,
                }),
            )
            .fingerprinted(),
            SectionSpec::new(
                "lifestyle",
                "Lifestyle",
                json!({
                    "smoker": null,
                    "alcohol_units_per_week": null,
                    "exercise": "",
                    "occupation": "",
                }),
            )
            .fingerprinted(),
            SectionSpec::new(
                "family_history",
                "Family history",
                json!({
                    "hereditary_conditions": [],
                    "relatives": [],
                }),
            )
            .fingerprinted(),
            SectionSpec::new(
                "consent",
                "Consent",
                json!({
                    "terms_accepted": false,
                    "data_sharing": false,
                    "signed_at": null,
                }),
            )
            .fingerprinted(),
            SectionSpec::new(
                "pricing",
                "Pricing",
                json!({
                    "plan": "",
                    "options": [],
                }),
            ),
            SectionSpec::new(
                "appointment",
                "Appointment",
                json!({
                    "clinic": "",
                    "slot": null,
                }),
            ),
            SectionSpec::new("overview", "Overview", json!({})),
        ];

        Self { sections }
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.sections.len() - 1
    }

    pub fn sections(&self) -> &[SectionSpec] {
        &self.sections
    }

    pub fn get(&self, index: usize) -> Option<&SectionSpec> {
        self.sections.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.sections.iter().position(|section| section.id == id)
    }

    pub fn require_index(&self, id: &str) -> Result<usize, IntakeError> {
        self.index_of(id)
            .ok_or_else(|| IntakeError::UnknownSection(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|section| section.id.as_str())
    }

    /// Ordered allow-list of sections that contribute to the fingerprint.
    pub fn fingerprint_sections(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter(|section| section.fingerprinted)
            .map(|section| section.id.clone())
            .collect()
    }
}

impl Default for SectionCatalog {
    fn default() -> Self {
        Self::application()
    }
}
