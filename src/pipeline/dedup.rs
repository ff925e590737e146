// src/pipeline/dedup.rs

//! Two-stage deduplication and merging.
//!
//! Stage one groups records by their exact [`DedupKey`]. Stage two asks the
//! reasoning service whether a record with a new key is a near-duplicate of
//! an already-kept record in the same scope; only a positive verdict at or
//! above the confidence threshold merges them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::models::{DedupConfig, DedupKey, ItemRecord, MergedRecord, flags};
use crate::services::confidence;
use crate::services::reasoning::{ReasoningService, ask_with_timeout, extract_json_object};

/// Outcome of a fuzzy equivalence check.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    /// Same entity, confidence at or above threshold
    Duplicate { anomalies: Vec<String> },
    /// Positive answer with too little confidence
    Weak { anomalies: Vec<String> },
    Distinct { anomalies: Vec<String> },
    /// The check could not be completed
    Unknown,
}

/// Merges duplicate records from one or more phases.
pub struct DedupEngine {
    config: DedupConfig,
    reasoning: Option<Arc<dyn ReasoningService>>,
    timeout: Duration,
}

impl DedupEngine {
    /// Engine with the fuzzy stage backed by `reasoning`.
    pub fn new(config: DedupConfig, reasoning: Arc<dyn ReasoningService>, timeout: Duration) -> Self {
        Self {
            config,
            reasoning: Some(reasoning),
            timeout,
        }
    }

    /// Engine that only merges exact key matches.
    pub fn exact_only(config: DedupConfig) -> Self {
        Self {
            config,
            reasoning: None,
            timeout: Duration::ZERO,
        }
    }

    /// Dedup key of a record; `None` when it has no usable identity.
    pub fn key_for(&self, record: &ItemRecord) -> Option<DedupKey> {
        let identity = record.lookup(&self.config.identity_field)?;
        let scope = self
            .config
            .scope_field
            .as_deref()
            .and_then(|field| record.lookup(field));
        DedupKey::new(&identity, scope.as_deref())
    }

    /// Collapse duplicates into merged records, first-seen order preserved.
    ///
    /// Records without an identity pass through unmerged.
    pub async fn dedup_and_merge(&self, records: Vec<ItemRecord>) -> Vec<MergedRecord> {
        let input_count = records.len();
        let mut kept: Vec<MergedRecord> = Vec::new();
        let mut by_key: HashMap<DedupKey, usize> = HashMap::new();
        let mut by_scope: HashMap<String, Vec<usize>> = HashMap::new();
        let mut exact = 0;
        let mut fuzzy = 0;

        for record in records {
            let key = self.key_for(&record);
            let mut incoming = MergedRecord::seed(record, key.clone());
            let Some(key) = key else {
                kept.push(incoming);
                continue;
            };

            if let Some(&index) = by_key.get(&key) {
                kept[index].absorb(incoming);
                exact += 1;
                continue;
            }

            let candidates = by_scope.get(&key.scope).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(index) = self.find_near_duplicate(&kept, candidates, &mut incoming).await {
                log::info!(
                    "Fuzzy merge: '{}' into '{}'",
                    key,
                    kept[index].key.as_ref().map(ToString::to_string).unwrap_or_default()
                );
                kept[index].absorb(incoming);
                kept[index].quality_flags.insert(flags::FUZZY_MERGED.to_string());
                by_key.insert(key, index);
                fuzzy += 1;
                continue;
            }

            let index = kept.len();
            kept.push(incoming);
            by_scope.entry(key.scope.clone()).or_default().push(index);
            by_key.insert(key, index);
        }

        log::info!(
            "Dedup: {} records -> {} merged ({} exact, {} fuzzy)",
            input_count,
            kept.len(),
            exact,
            fuzzy
        );
        kept
    }

    /// First kept candidate judged equivalent to `incoming`.
    ///
    /// Flags raised along the way are attached to `incoming`.
    async fn find_near_duplicate(
        &self,
        kept: &[MergedRecord],
        candidates: &[usize],
        incoming: &mut MergedRecord,
    ) -> Option<usize> {
        if !self.config.fuzzy_enabled {
            return None;
        }
        let reasoning = self.reasoning.as_ref()?;

        for &index in candidates {
            match self.judge(reasoning.as_ref(), &kept[index], incoming).await {
                Verdict::Duplicate { anomalies } => {
                    incoming.quality_flags.extend(anomalies);
                    return Some(index);
                }
                Verdict::Weak { anomalies } => {
                    incoming.quality_flags.extend(anomalies);
                    incoming.quality_flags.insert(flags::LOW_CONFIDENCE.to_string());
                }
                Verdict::Distinct { anomalies } => {
                    incoming.quality_flags.extend(anomalies);
                }
                Verdict::Unknown => {
                    incoming
                        .quality_flags
                        .insert(flags::DEDUP_CHECK_FAILED.to_string());
                }
            }
        }
        None
    }

    async fn judge(
        &self,
        reasoning: &dyn ReasoningService,
        kept: &MergedRecord,
        incoming: &MergedRecord,
    ) -> Verdict {
        let prompt = self.build_prompt(kept, incoming);
        let reply = match ask_with_timeout(reasoning, &prompt, self.timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Equivalence check failed: {}", e);
                return Verdict::Unknown;
            }
        };
        parse_verdict(&reply, self.config.confidence_threshold)
    }

    fn build_prompt(&self, kept: &MergedRecord, incoming: &MergedRecord) -> String {
        let render = |record: &MergedRecord| {
            serde_json::to_string(&record.fields).unwrap_or_else(|_| "{}".to_string())
        };
        format!(
            "Do these two records describe the same real-world entity?\n\
             Identity field: {field}\n\
             Record A: {a}\n\
             Record B: {b}\n\n\
             Reply with a JSON object only: \
             {{\"equivalent\": true|false, \"confidence\": <0-100>}}",
            field = self.config.identity_field,
            a = render(kept),
            b = render(incoming),
        )
    }
}

fn parse_verdict(reply: &str, threshold: u8) -> Verdict {
    let Some(object) = extract_json_object(reply) else {
        log::warn!(
            "Equivalence reply held no JSON object: {:?}",
            reply.chars().take(120).collect::<String>()
        );
        return Verdict::Unknown;
    };

    let positive = match object.get("equivalent") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("yes") || s.eq_ignore_ascii_case("true")
        }
        _ => false,
    };
    let confidence = confidence::normalize(object.get("confidence"));
    let anomalies = confidence.flags.clone();

    if !positive {
        Verdict::Distinct { anomalies }
    } else if confidence.value >= threshold {
        Verdict::Duplicate { anomalies }
    } else {
        log::debug!(
            "Equivalent verdict rejected: confidence {} below {}",
            confidence.value,
            threshold
        );
        Verdict::Weak { anomalies }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::{AppError, Result};
    use crate::models::{FieldMap, FieldValue, QualityFlags};

    struct Oracle {
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Oracle {
        fn replying(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply),
                calls: AtomicUsize::new(0),
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ReasoningService for Oracle {
        async fn ask(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(str::to_string)
                .ok_or_else(|| AppError::reasoning("unreachable"))
        }
    }

    fn record(id: &str, fields: &[(&str, &str)]) -> ItemRecord {
        let data: FieldMap = fields
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
            .collect();
        ItemRecord {
            item_id: id.into(),
            locator: format!("https://example.edu/{id}"),
            metadata: BTreeMap::new(),
            data,
            sufficient: true,
            missing_fields: Vec::new(),
            attempts: 1,
            quality_flags: QualityFlags::new(),
        }
    }

    fn config() -> DedupConfig {
        DedupConfig {
            scope_field: Some("dept".into()),
            ..DedupConfig::default()
        }
    }

    fn engine(oracle: Arc<Oracle>) -> DedupEngine {
        DedupEngine::new(config(), oracle, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_exact_duplicates_merge() {
        let records = vec![
            record("a", &[("name", "Ada Lovelace"), ("dept", "Math")]),
            record("b", &[("name", "ada  LOVELACE"), ("dept", "math"), ("email", "ada@x.edu")]),
        ];
        let oracle = Oracle::replying(r#"{"equivalent": true, "confidence": 99}"#);

        let merged = engine(oracle.clone()).dedup_and_merge(records).await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].sources, vec!["a", "b"]);
        assert_eq!(merged[0].locators.len(), 2);
        assert_eq!(merged[0].fields["email"], FieldValue::from("ada@x.edu"));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exact_merge_is_order_independent() {
        let base = vec![
            record("a", &[("name", "Ada"), ("dept", "Math")]),
            record("b", &[("name", "Grace"), ("dept", "CS")]),
            record("c", &[("name", "ada"), ("dept", "math")]),
            record("d", &[("name", "Alan"), ("dept", "Math")]),
            record("e", &[("name", "GRACE"), ("dept", "cs")]),
        ];
        let engine = DedupEngine::exact_only(config());

        for rotation in 0..base.len() {
            let mut records = base.clone();
            records.rotate_left(rotation);
            let merged = engine.dedup_and_merge(records).await;
            assert_eq!(merged.len(), 3, "rotation {rotation}");
        }

        let mut reversed = base.clone();
        reversed.reverse();
        assert_eq!(engine.dedup_and_merge(reversed).await.len(), 3);
    }

    #[tokio::test]
    async fn test_same_identity_in_other_scope_is_distinct() {
        let records = vec![
            record("a", &[("name", "Ada"), ("dept", "Math")]),
            record("b", &[("name", "Ada"), ("dept", "Physics")]),
        ];
        let oracle = Oracle::replying(r#"{"equivalent": true, "confidence": 99}"#);

        let merged = engine(oracle.clone()).dedup_and_merge(records).await;
        assert_eq!(merged.len(), 2);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fuzzy_merge_on_confident_yes() {
        let records = vec![
            record("a", &[("name", "Ada Lovelace"), ("dept", "Math")]),
            record("b", &[("name", "A. Lovelace"), ("dept", "Math")]),
            record("c", &[("name", "A. Lovelace"), ("dept", "Math")]),
        ];
        let oracle = Oracle::replying(r#"{"equivalent": "yes", "confidence": "95"}"#);

        let merged = engine(oracle.clone()).dedup_and_merge(records).await;
        assert_eq!(merged.len(), 1);
        assert!(merged[0].quality_flags.contains(flags::FUZZY_MERGED));
        assert_eq!(merged[0].sources, vec!["a", "b", "c"]);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_yes_keeps_records_apart() {
        let records = vec![
            record("a", &[("name", "Ada Lovelace"), ("dept", "Math")]),
            record("b", &[("name", "A. Lovelace"), ("dept", "Math")]),
        ];
        let oracle = Oracle::replying(r#"{"equivalent": true, "confidence": 60}"#);

        let merged = engine(oracle).dedup_and_merge(records).await;
        assert_eq!(merged.len(), 2);
        assert!(merged[1].quality_flags.contains(flags::LOW_CONFIDENCE));
    }

    #[tokio::test]
    async fn test_anomalous_confidence_is_flagged_and_rejected() {
        let records = vec![
            record("a", &[("name", "Ada Lovelace"), ("dept", "Math")]),
            record("b", &[("name", "A. Lovelace"), ("dept", "Math")]),
        ];
        let oracle = Oracle::replying(r#"{"equivalent": true, "confidence": true}"#);

        let merged = engine(oracle).dedup_and_merge(records).await;
        assert_eq!(merged.len(), 2);
        assert!(merged[1].quality_flags.contains(flags::CONFIDENCE_DEFAULTED));
        assert!(merged[1].quality_flags.contains(flags::LOW_CONFIDENCE));
    }

    #[tokio::test]
    async fn test_failed_check_keeps_records_apart() {
        let records = vec![
            record("a", &[("name", "Ada Lovelace"), ("dept", "Math")]),
            record("b", &[("name", "A. Lovelace"), ("dept", "Math")]),
        ];

        let merged = engine(Oracle::broken()).dedup_and_merge(records).await;
        assert_eq!(merged.len(), 2);
        assert!(merged[1].quality_flags.contains(flags::DEDUP_CHECK_FAILED));
    }

    #[tokio::test]
    async fn test_records_without_identity_pass_through() {
        let records = vec![record("a", &[("dept", "Math")]), record("b", &[("dept", "Math")])];
        let oracle = Oracle::replying(r#"{"equivalent": true, "confidence": 100}"#);

        let merged = engine(oracle.clone()).dedup_and_merge(records).await;
        assert_eq!(merged.len(), 2);
        assert_ne!(merged[0].id, merged[1].id);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_conflicting_values_keep_first_and_flag() {
        let records = vec![
            record("a", &[("name", "Ada"), ("dept", "Math"), ("email", "ada@x.edu")]),
            record("b", &[("name", "Ada"), ("dept", "Math"), ("email", "lovelace@x.edu")]),
        ];

        let merged = DedupEngine::exact_only(config()).dedup_and_merge(records).await;
        assert_eq!(merged[0].fields["email"], FieldValue::from("ada@x.edu"));
        assert!(merged[0].quality_flags.contains(flags::MERGE_CONFLICT));
    }

    #[test]
    fn test_parse_verdict_vocabulary() {
        assert!(matches!(
            parse_verdict(r#"{"equivalent": false, "confidence": 100}"#, 90),
            Verdict::Distinct { .. }
        ));
        assert!(matches!(
            parse_verdict(r#"{"equivalent": "TRUE", "confidence": 90}"#, 90),
            Verdict::Duplicate { .. }
        ));
        assert!(matches!(
            parse_verdict(r#"{"equivalent": true, "confidence": 250}"#, 90),
            Verdict::Duplicate { ref anomalies } if anomalies == &vec![flags::CONFIDENCE_CLAMPED.to_string()]
        ));
        assert_eq!(parse_verdict("sure, same person", 90), Verdict::Unknown);
    }
}
