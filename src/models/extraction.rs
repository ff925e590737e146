// src/models/extraction.rs

//! Typed extraction payloads and acquisition results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::QualityFlags;

/// A single extracted value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Whether the value carries usable data.
    pub fn is_populated(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Bool(_) => true,
            FieldValue::Number(n) => n.is_finite(),
            FieldValue::Text(s) => !s.trim().is_empty(),
            FieldValue::List(items) => items.iter().any(|s| !s.trim().is_empty()),
        }
    }

    /// Text view of the value, if it has one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            FieldValue::List(items) => items.first().map(String::as_str),
            _ => None,
        }
    }

    /// Convert loosely-typed JSON into a field value.
    ///
    /// Arrays become string lists; objects are kept as their JSON text.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => n.as_f64().map_or(FieldValue::Null, FieldValue::Number),
            Value::String(s) => FieldValue::Text(s.trim().to_string()),
            Value::Array(items) => FieldValue::List(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Null => None,
                        Value::String(s) => Some(s.trim().to_string()),
                        other => Some(other.to_string()),
                    })
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            obj @ Value::Object(_) => FieldValue::Text(obj.to_string()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

/// Field name -> value, ordered for stable serialization.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Merge `incoming` into `kept` without ever replacing a populated value.
///
/// Empty fields in `kept` take the incoming value; populated lists are
/// unioned. Returns `true` when both sides held different populated
/// scalar values (the kept value wins).
pub fn merge_fields(kept: &mut FieldMap, incoming: &FieldMap) -> bool {
    let mut conflict = false;

    for (name, value) in incoming {
        if !value.is_populated() {
            kept.entry(name.clone()).or_insert(FieldValue::Null);
            continue;
        }

        match kept.get_mut(name) {
            Some(existing) if existing.is_populated() => {
                match (existing, value) {
                    (FieldValue::List(ours), FieldValue::List(theirs)) => {
                        for item in theirs {
                            if !ours.contains(item) {
                                ours.push(item.clone());
                            }
                        }
                    }
                    (ours, theirs) => {
                        if ours != theirs {
                            conflict = true;
                        }
                    }
                }
            }
            Some(existing) => *existing = value.clone(),
            None => {
                kept.insert(name.clone(), value.clone());
            }
        }
    }

    conflict
}

/// Classification of an acquisition attempt or result.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionOutcome {
    /// Data gathered and judged complete
    Ok(FieldMap),
    /// Some data gathered, with caveats
    Partial(FieldMap, QualityFlags),
    /// Nothing usable gathered
    Failed(QualityFlags),
}

/// Final result of acquiring one locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Best data gathered across all attempts
    pub data: FieldMap,

    /// Whether the required fields were satisfied
    pub sufficient: bool,

    /// Required fields still missing
    pub missing_fields: Vec<String>,

    /// Tier attempts made
    pub attempts: u32,

    /// Degradation caveats
    pub quality_flags: QualityFlags,
}

impl ExtractionResult {
    /// Classify the result as complete, partial, or failed.
    pub fn into_outcome(self) -> AcquisitionOutcome {
        if self.sufficient {
            AcquisitionOutcome::Ok(self.data)
        } else if self.data.values().any(FieldValue::is_populated) {
            AcquisitionOutcome::Partial(self.data, self.quality_flags)
        } else {
            AcquisitionOutcome::Failed(self.quality_flags)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::flags;

    fn map(entries: &[(&str, FieldValue)]) -> FieldMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_is_populated() {
        assert!(!FieldValue::Null.is_populated());
        assert!(!FieldValue::Text("   ".into()).is_populated());
        assert!(!FieldValue::List(vec!["".into()]).is_populated());
        assert!(!FieldValue::Number(f64::NAN).is_populated());
        assert!(FieldValue::Bool(false).is_populated());
        assert!(FieldValue::Text("Yonsei".into()).is_populated());
    }

    #[test]
    fn test_from_json() {
        let value = serde_json::json!(["a", 1, null, " "]);
        assert_eq!(
            FieldValue::from_json(value),
            FieldValue::List(vec!["a".into(), "1".into()])
        );
        assert_eq!(
            FieldValue::from_json(serde_json::json!(3.5)),
            FieldValue::Number(3.5)
        );
    }

    #[test]
    fn test_merge_never_empties_a_field() {
        let mut kept = map(&[("name", "Ada".into()), ("email", FieldValue::Null)]);
        let incoming = map(&[
            ("name", FieldValue::Text(String::new())),
            ("email", "ada@example.com".into()),
        ]);

        let conflict = merge_fields(&mut kept, &incoming);
        assert!(!conflict);
        assert_eq!(kept["name"], FieldValue::from("Ada"));
        assert_eq!(kept["email"], FieldValue::from("ada@example.com"));
    }

    #[test]
    fn test_merge_prefers_first_seen_and_reports_conflict() {
        let mut kept = map(&[("name", "Ada".into())]);
        let conflict = merge_fields(&mut kept, &map(&[("name", "Ada L.".into())]));
        assert!(conflict);
        assert_eq!(kept["name"], FieldValue::from("Ada"));
    }

    #[test]
    fn test_merge_unions_lists() {
        let mut kept = map(&[("tags", FieldValue::List(vec!["a".into(), "b".into()]))]);
        let incoming = map(&[("tags", FieldValue::List(vec!["b".into(), "c".into()]))]);
        assert!(!merge_fields(&mut kept, &incoming));
        assert_eq!(
            kept["tags"],
            FieldValue::List(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn test_outcome_classification() {
        let result = ExtractionResult {
            data: map(&[("name", "Ada".into())]),
            sufficient: false,
            missing_fields: vec!["email".into()],
            attempts: 3,
            quality_flags: flags::set([flags::INSUFFICIENT_AFTER_ESCALATION]),
        };
        assert!(matches!(
            result.clone().into_outcome(),
            AcquisitionOutcome::Partial(_, _)
        ));

        let empty = ExtractionResult {
            data: FieldMap::new(),
            ..result
        };
        assert!(matches!(empty.into_outcome(), AcquisitionOutcome::Failed(_)));
    }
}
