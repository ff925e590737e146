// src/models/schema.rs

//! Declarative entity descriptor.
//!
//! Describes which fields an entity kind requires, which it may carry, and
//! (optionally) the CSS selectors used to extract them from a page.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Required/optional field contract for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity kind (e.g. "university", "person")
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Fields every record of this kind must carry
    #[serde(default = "default_required")]
    pub required: Vec<String>,

    /// Fields that may be present
    #[serde(default)]
    pub optional: Vec<String>,

    /// Field name -> CSS selector (`selector@attr` reads an attribute)
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,
}

fn default_kind() -> String {
    "record".into()
}

fn default_required() -> Vec<String> {
    vec!["name".into()]
}

impl Default for EntitySchema {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            required: default_required(),
            optional: Vec::new(),
            selectors: BTreeMap::new(),
        }
    }
}

impl EntitySchema {
    /// Required field set.
    pub fn required_set(&self) -> BTreeSet<String> {
        self.required.iter().cloned().collect()
    }

    /// Every declared field, required first.
    pub fn declared_fields(&self) -> impl Iterator<Item = &str> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .map(String::as_str)
    }

    /// Whether a field is part of this schema.
    pub fn declares(&self, field: &str) -> bool {
        self.declared_fields().any(|f| f == field)
    }

    /// Check the descriptor for blank or overlapping field names.
    pub fn validate(&self) -> Result<()> {
        if self.kind.trim().is_empty() {
            return Err(AppError::validation("schema.kind is empty"));
        }
        let mut seen = BTreeSet::new();
        for field in self.declared_fields() {
            if field.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "schema '{}' declares a blank field name",
                    self.kind
                )));
            }
            if !seen.insert(field) {
                return Err(AppError::validation(format!(
                    "schema '{}' declares '{}' more than once",
                    self.kind, field
                )));
            }
        }
        if let Some(field) = self.selectors.keys().find(|f| !self.declares(f)) {
            return Err(AppError::validation(format!(
                "schema '{}' has a selector for undeclared field '{}'",
                self.kind, field
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> EntitySchema {
        EntitySchema {
            kind: "person".into(),
            required: vec!["name".into(), "email".into()],
            optional: vec!["title".into()],
            selectors: BTreeMap::from([("name".into(), "h1.name".into())]),
        }
    }

    #[test]
    fn test_default_schema_is_valid() {
        assert!(EntitySchema::default().validate().is_ok());
    }

    #[test]
    fn test_declares() {
        let schema = person();
        assert!(schema.declares("title"));
        assert!(!schema.declares("phone"));
        assert_eq!(schema.required_set().len(), 2);
    }

    #[test]
    fn test_rejects_duplicate_field() {
        let mut schema = person();
        schema.optional.push("email".into());
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_rejects_selector_for_unknown_field() {
        let mut schema = person();
        schema.selectors.insert("phone".into(), "span.tel".into());
        assert!(schema.validate().is_err());
    }
}
