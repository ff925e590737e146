// src/services/confidence.rs

//! Confidence normalization.
//!
//! The reasoning service reports confidence in whatever shape it likes:
//! integers, floats, numeric strings, booleans, or nothing. Everything is
//! coerced into `0..=100`; anything unusable becomes the default value and
//! carries an anomaly flag.

use serde_json::Value;
use thiserror::Error;

use crate::models::flags;

/// Value used when a confidence is missing or invalid.
pub const DEFAULT_CONFIDENCE: u8 = 50;

/// Why a raw confidence could not be interpreted.
#[derive(Debug, Error, PartialEq)]
pub enum ConfidenceError {
    #[error("confidence is missing")]
    Missing,

    #[error("boolean {0} is not a confidence")]
    Boolean(bool),

    #[error("cannot parse confidence from {0}")]
    Unparseable(String),

    #[error("confidence {0} is not finite")]
    NotFinite(f64),
}

/// Normalized confidence plus any anomaly flags raised on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confidence {
    pub value: u8,
    pub flags: Vec<String>,
}

impl Confidence {
    /// Whether normalization had to intervene.
    pub fn is_anomalous(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Normalize a raw confidence value.
pub fn normalize(raw: Option<&Value>) -> Confidence {
    match parse(raw) {
        Ok(number) => {
            if (0.0..=100.0).contains(&number) {
                Confidence {
                    value: number.round() as u8,
                    flags: Vec::new(),
                }
            } else {
                log::debug!("Confidence {} outside 0..=100; clamping", number);
                Confidence {
                    value: number.clamp(0.0, 100.0).round() as u8,
                    flags: vec![flags::CONFIDENCE_CLAMPED.to_string()],
                }
            }
        }
        Err(e) => {
            log::debug!("Falling back to default confidence: {}", e);
            Confidence {
                value: DEFAULT_CONFIDENCE,
                flags: vec![flags::CONFIDENCE_DEFAULTED.to_string()],
            }
        }
    }
}

fn parse(raw: Option<&Value>) -> Result<f64, ConfidenceError> {
    let number = match raw {
        None | Some(Value::Null) => return Err(ConfidenceError::Missing),
        Some(Value::Bool(b)) => return Err(ConfidenceError::Boolean(*b)),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ConfidenceError::Unparseable(n.to_string()))?,
        Some(Value::String(s)) => {
            let trimmed = s.trim().trim_end_matches('%').trim();
            if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
                return Err(ConfidenceError::Boolean(trimmed.eq_ignore_ascii_case("true")));
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| ConfidenceError::Unparseable(s.clone()))?
        }
        Some(other) => return Err(ConfidenceError::Unparseable(other.to_string())),
    };

    if number.is_finite() {
        Ok(number)
    } else {
        Err(ConfidenceError::NotFinite(number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn norm(value: Value) -> Confidence {
        normalize(Some(&value))
    }

    #[test]
    fn test_in_range_numbers_pass_through() {
        assert_eq!(norm(json!(0)).value, 0);
        assert_eq!(norm(json!(100)).value, 100);
        assert_eq!(norm(json!(92.6)).value, 93);
        assert!(!norm(json!(42)).is_anomalous());
    }

    #[test]
    fn test_numeric_strings_are_parsed_and_rounded() {
        let c = norm(json!(" 88.4 "));
        assert_eq!(c.value, 88);
        assert!(c.flags.is_empty());
        assert_eq!(norm(json!("95%")).value, 95);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let high = norm(json!(140));
        assert_eq!(high.value, 100);
        assert_eq!(high.flags, vec![flags::CONFIDENCE_CLAMPED]);

        let low = norm(json!("-3"));
        assert_eq!(low.value, 0);
        assert_eq!(low.flags, vec![flags::CONFIDENCE_CLAMPED]);
    }

    #[test]
    fn test_booleans_are_invalid() {
        for raw in [json!(true), json!(false), json!("true")] {
            let c = norm(raw);
            assert_eq!(c.value, DEFAULT_CONFIDENCE);
            assert_eq!(c.flags, vec![flags::CONFIDENCE_DEFAULTED]);
        }
        assert_eq!(parse(Some(&json!(true))), Err(ConfidenceError::Boolean(true)));
    }

    #[test]
    fn test_missing_and_garbage_default() {
        for raw in [None, Some(json!(null)), Some(json!("very sure")), Some(json!([90]))] {
            let c = normalize(raw.as_ref());
            assert_eq!(c.value, DEFAULT_CONFIDENCE);
            assert!(c.is_anomalous());
        }
        assert_eq!(
            norm(json!("NaN")).flags,
            vec![flags::CONFIDENCE_DEFAULTED]
        );
    }

    #[test]
    fn test_all_numeric_inputs_land_in_range() {
        for raw in [-1e9, -0.4, 0.0, 49.5, 99.6, 100.4, 1e12] {
            let c = norm(json!(raw));
            assert!(c.value <= 100);
        }
    }
}
