// src/services/sufficiency.rs

//! Sufficiency evaluation.
//!
//! Judges whether candidate data satisfies a required-fields contract with a
//! single reasoning-service call constrained to a fixed reply vocabulary:
//!
//! ```text
//! SUFFICIENT
//! INSUFFICIENT: field_a, field_b
//! ```
//!
//! Anything else (errors, timeouts, empty or malformed replies) is read as
//! "not sufficient, everything missing".

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;

use crate::models::FieldMap;
use crate::services::reasoning::{ReasoningService, ask_with_timeout};

/// Verdict for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sufficiency {
    pub sufficient: bool,
    pub missing: Vec<String>,
}

impl Sufficiency {
    fn satisfied() -> Self {
        Self {
            sufficient: true,
            missing: Vec::new(),
        }
    }

    fn all_missing(required: &BTreeSet<String>) -> Self {
        Self {
            sufficient: false,
            missing: required.iter().cloned().collect(),
        }
    }
}

/// Reasoning-backed sufficiency judge.
#[derive(Clone)]
pub struct SufficiencyEvaluator {
    reasoning: Arc<dyn ReasoningService>,
    timeout: Duration,
}

impl SufficiencyEvaluator {
    pub fn new(reasoning: Arc<dyn ReasoningService>, timeout: Duration) -> Self {
        Self { reasoning, timeout }
    }

    /// Evaluate `candidate` against `required`. Never fails.
    ///
    /// Required fields absent from the candidate are always reported
    /// missing, whatever the service says.
    pub async fn evaluate(&self, candidate: &FieldMap, required: &BTreeSet<String>) -> Sufficiency {
        if required.is_empty() {
            return Sufficiency::satisfied();
        }

        let locally_missing: BTreeSet<String> = required
            .iter()
            .filter(|field| !candidate.get(*field).is_some_and(|v| v.is_populated()))
            .cloned()
            .collect();
        if locally_missing.len() == required.len() {
            return Sufficiency::all_missing(required);
        }

        let prompt = build_prompt(candidate, required);
        let reply = match ask_with_timeout(self.reasoning.as_ref(), &prompt, self.timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Sufficiency check failed, assuming insufficient: {}", e);
                return Sufficiency::all_missing(required);
            }
        };

        let Some(verdict) = parse_verdict(&reply, required) else {
            log::warn!(
                "Unrecognized sufficiency reply, assuming insufficient: {:?}",
                reply.chars().take(120).collect::<String>()
            );
            return Sufficiency::all_missing(required);
        };

        let missing: BTreeSet<String> = verdict.missing.into_iter().chain(locally_missing).collect();
        Sufficiency {
            sufficient: verdict.sufficient && missing.is_empty(),
            missing: missing.into_iter().collect(),
        }
    }
}

fn build_prompt(candidate: &FieldMap, required: &BTreeSet<String>) -> String {
    let data = serde_json::to_string_pretty(candidate).unwrap_or_else(|_| "{}".to_string());
    let fields = required.iter().cloned().collect::<Vec<_>>().join(", ");

    format!(
        "You check extracted records for completeness.\n\
         Required fields: {fields}\n\
         Candidate data (JSON):\n{data}\n\n\
         A field counts as present only if it holds a plausible, non-placeholder value.\n\
         Reply with exactly one line and nothing else, either:\n\
         SUFFICIENT\n\
         or\n\
         INSUFFICIENT: <comma-separated list of missing required fields>"
    )
}

/// Parse a reply in the fixed vocabulary. `None` when it does not conform.
fn parse_verdict(reply: &str, required: &BTreeSet<String>) -> Option<Sufficiency> {
    static VERDICT: OnceLock<Option<Regex>> = OnceLock::new();
    let re = VERDICT
        .get_or_init(|| Regex::new(r"(?i)^(INSUFFICIENT|SUFFICIENT)\b\s*:?\s*(.*)$").ok())
        .as_ref()?;

    let line = reply
        .lines()
        .map(|l| l.trim().trim_matches(|c| c == '*' || c == '`' || c == '"').trim())
        .find(|l| !l.is_empty())?;
    let caps = re.captures(line)?;
    let keyword = caps.get(1)?.as_str().to_ascii_uppercase();
    let rest = caps.get(2).map_or("", |m| m.as_str());

    // A bare SUFFICIENT is the only positive reply; anything trailing it is
    // a hedge, not a verdict.
    if keyword == "SUFFICIENT" {
        return rest
            .trim()
            .trim_end_matches('.')
            .is_empty()
            .then(Sufficiency::satisfied);
    }

    let listed: Vec<String> = rest
        .split(',')
        .map(|f| f.trim().trim_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .filter_map(|f| required.iter().find(|r| r.eq_ignore_ascii_case(f)).cloned())
        .collect();

    if listed.is_empty() {
        Some(Sufficiency::all_missing(required))
    } else {
        Some(Sufficiency {
            sufficient: false,
            missing: listed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, Result};
    use crate::models::FieldValue;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        reply: Result<String>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(AppError::reasoning("connection refused")),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ReasoningService for Scripted {
        async fn ask(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(r) => Ok(r.clone()),
                Err(e) => Err(AppError::reasoning(e)),
            }
        }
    }

    fn required(fields: &[&str]) -> BTreeSet<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn candidate(entries: &[(&str, &str)]) -> FieldMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
            .collect()
    }

    fn evaluator(service: Arc<Scripted>) -> SufficiencyEvaluator {
        SufficiencyEvaluator::new(service, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_sufficient_reply() {
        let service = Scripted::ok("SUFFICIENT");
        let verdict = evaluator(service.clone())
            .evaluate(
                &candidate(&[("name", "Ada"), ("email", "ada@example.com")]),
                &required(&["name", "email"]),
            )
            .await;
        assert!(verdict.sufficient);
        assert!(verdict.missing.is_empty());
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_insufficient_reply_lists_fields() {
        let verdict = evaluator(Scripted::ok("**INSUFFICIENT: email**"))
            .evaluate(
                &candidate(&[("name", "Ada"), ("email", "n/a")]),
                &required(&["name", "email"]),
            )
            .await;
        assert!(!verdict.sufficient);
        assert_eq!(verdict.missing, vec!["email"]);
    }

    #[tokio::test]
    async fn test_locally_missing_fields_override_service() {
        let verdict = evaluator(Scripted::ok("SUFFICIENT"))
            .evaluate(&candidate(&[("name", "Ada")]), &required(&["name", "email"]))
            .await;
        assert!(!verdict.sufficient);
        assert_eq!(verdict.missing, vec!["email"]);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_conservative() {
        let replies = [
            "",
            "Looks good to me!",
            "MAYBE",
            "SUFFICIENT? No, email is a placeholder",
            "Sufficient, except email looks fake",
            "SUFFICIENT: email missing",
        ];
        for reply in replies {
            let verdict = evaluator(Scripted::ok(reply))
                .evaluate(
                    &candidate(&[("name", "Ada"), ("email", "ada@example.com")]),
                    &required(&["name", "email"]),
                )
                .await;
            assert!(!verdict.sufficient, "{reply:?} should not be sufficient");
            assert_eq!(verdict.missing, vec!["email", "name"]);
        }
    }

    #[tokio::test]
    async fn test_service_error_is_conservative() {
        let verdict = evaluator(Scripted::failing())
            .evaluate(&candidate(&[("name", "Ada")]), &required(&["name"]))
            .await;
        assert!(!verdict.sufficient);
        assert_eq!(verdict.missing, vec!["name"]);
    }

    #[tokio::test]
    async fn test_empty_candidate_skips_service() {
        let service = Scripted::ok("SUFFICIENT");
        let verdict = evaluator(service.clone())
            .evaluate(&FieldMap::new(), &required(&["name"]))
            .await;
        assert!(!verdict.sufficient);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parse_verdict_ignores_unknown_fields() {
        let verdict = parse_verdict("INSUFFICIENT: phone", &required(&["name"])).unwrap();
        assert_eq!(verdict.missing, vec!["name"]);
        assert!(parse_verdict("SUFFICIENTLY vague", &required(&["name"])).is_none());
    }

    #[test]
    fn test_parse_verdict_accepts_only_bare_sufficient() {
        let fields = required(&["name", "email"]);
        for reply in ["SUFFICIENT", "sufficient.", "`SUFFICIENT`\n"] {
            assert_eq!(
                parse_verdict(reply, &fields),
                Some(Sufficiency::satisfied()),
                "{reply:?}"
            );
        }
        for reply in ["SUFFICIENT: email missing", "Sufficient, except email looks fake"] {
            assert!(parse_verdict(reply, &fields).is_none(), "{reply:?}");
        }
    }
}
