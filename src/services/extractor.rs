// src/services/extractor.rs

//! Field extraction from fetched content.
//!
//! Turns a page into a typed [`FieldMap`] according to the entity schema.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{EntitySchema, FieldMap, FieldValue};
use crate::services::reasoning::{ReasoningService, ask_with_timeout, extract_json_object};
use crate::services::{PageContent, page_text};
use crate::utils::resolve_url;

/// Extracts declared fields from page content.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// Extract `fields` (and any optional schema fields) from `content`.
    async fn extract(&self, content: &PageContent, fields: &BTreeSet<String>) -> Result<FieldMap>;
}

/// A compiled field selector, optionally reading an attribute.
struct FieldSelector {
    selector: Selector,
    attr: Option<String>,
}

impl FieldSelector {
    /// Parse `css` or `css@attr`.
    fn parse(raw: &str) -> Result<Self> {
        let (css, attr) = match raw.rsplit_once('@') {
            Some((css, attr)) if !attr.is_empty() && !attr.contains([' ', ']', '"', '\'']) => {
                (css.trim(), Some(attr.trim().to_string()))
            }
            _ => (raw.trim(), None),
        };
        let selector = Selector::parse(css).map_err(|e| AppError::selector(css, format!("{e:?}")))?;
        Ok(Self { selector, attr })
    }
}

/// CSS-selector extractor driven by `schema.selectors`.
pub struct SelectorExtractor {
    selectors: BTreeMap<String, FieldSelector>,
}

impl SelectorExtractor {
    /// Compile every selector in the schema.
    pub fn new(schema: &EntitySchema) -> Result<Self> {
        let selectors = schema
            .selectors
            .iter()
            .map(|(field, raw)| Ok((field.clone(), FieldSelector::parse(raw)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { selectors })
    }

    fn extract_sync(&self, content: &PageContent, fields: &BTreeSet<String>) -> FieldMap {
        let document = Html::parse_document(&content.html);
        let base = url::Url::parse(&content.final_locator).ok();
        let mut data = FieldMap::new();

        for (field, spec) in &self.selectors {
            let values: Vec<String> = document
                .select(&spec.selector)
                .filter_map(|el| match &spec.attr {
                    Some(attr) => el.value().attr(attr).map(|v| match &base {
                        Some(base) if attr == "href" || attr == "src" => resolve_url(base, v),
                        _ => v.trim().to_string(),
                    }),
                    None => Some(
                        el.text()
                            .flat_map(str::split_whitespace)
                            .collect::<Vec<_>>()
                            .join(" "),
                    ),
                })
                .filter(|v| !v.is_empty())
                .collect();

            let value = match values.len() {
                0 => FieldValue::Null,
                1 => FieldValue::Text(values.into_iter().next().unwrap_or_default()),
                _ => FieldValue::List(values),
            };
            data.insert(field.clone(), value);
        }

        for field in fields {
            data.entry(field.clone()).or_insert(FieldValue::Null);
        }
        data
    }
}

#[async_trait]
impl FieldExtractor for SelectorExtractor {
    async fn extract(&self, content: &PageContent, fields: &BTreeSet<String>) -> Result<FieldMap> {
        Ok(self.extract_sync(content, fields))
    }
}

/// Extractor that asks the reasoning service for a JSON object.
pub struct ReasoningExtractor {
    reasoning: Arc<dyn ReasoningService>,
    schema: EntitySchema,
    max_chars: usize,
    timeout: Duration,
}

impl ReasoningExtractor {
    pub fn new(
        reasoning: Arc<dyn ReasoningService>,
        schema: EntitySchema,
        max_chars: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            reasoning,
            schema,
            max_chars,
            timeout,
        }
    }

    fn build_prompt(&self, text: &str, fields: &[String]) -> String {
        format!(
            "Extract a '{kind}' record from the page text below.\n\
             Return a single JSON object with exactly these keys: {keys}.\n\
             Use null for anything the page does not state. Do not guess.\n\n\
             PAGE TEXT:\n{text}",
            kind = self.schema.kind,
            keys = fields.join(", "),
        )
    }
}

#[async_trait]
impl FieldExtractor for ReasoningExtractor {
    async fn extract(&self, content: &PageContent, fields: &BTreeSet<String>) -> Result<FieldMap> {
        let text = page_text(&content.html, self.max_chars);
        if text.is_empty() {
            return Ok(fields.iter().map(|f| (f.clone(), FieldValue::Null)).collect());
        }

        let mut keys: Vec<String> = fields.iter().cloned().collect();
        for optional in &self.schema.optional {
            if !keys.contains(optional) {
                keys.push(optional.clone());
            }
        }

        let prompt = self.build_prompt(&text, &keys);
        let reply = ask_with_timeout(self.reasoning.as_ref(), &prompt, self.timeout).await?;

        let Some(serde_json::Value::Object(object)) = extract_json_object(&reply) else {
            log::warn!(
                "Extraction reply for {} held no JSON object",
                content.locator
            );
            return Ok(fields.iter().map(|f| (f.clone(), FieldValue::Null)).collect());
        };

        let mut data: FieldMap = object
            .into_iter()
            .filter(|(key, _)| keys.contains(key))
            .map(|(key, value)| (key, FieldValue::from_json(value)))
            .collect();
        for field in fields {
            data.entry(field.clone()).or_insert(FieldValue::Null);
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> EntitySchema {
        EntitySchema {
            kind: "person".into(),
            required: vec!["name".into(), "homepage".into()],
            optional: vec!["tags".into()],
            selectors: BTreeMap::from([
                ("name".into(), "h1.name".into()),
                ("homepage".into(), "a.home@href".into()),
                ("tags".into(), "ul.tags li".into()),
            ]),
        }
    }

    fn required() -> BTreeSet<String> {
        ["name".to_string(), "homepage".to_string()].into()
    }

    #[tokio::test]
    async fn test_selector_extraction() {
        let html = r#"
            <html><body>
              <h1 class="name">  Ada   Lovelace </h1>
              <a class="home" href="/~ada">home</a>
              <ul class="tags"><li>math</li><li>engines</li></ul>
            </body></html>"#;
        let content = PageContent::new("https://example.edu/people/ada", html);
        let extractor = SelectorExtractor::new(&schema()).unwrap();

        let data = extractor.extract(&content, &required()).await.unwrap();
        assert_eq!(data["name"], FieldValue::from("Ada Lovelace"));
        assert_eq!(data["homepage"], FieldValue::from("https://example.edu/~ada"));
        assert_eq!(
            data["tags"],
            FieldValue::List(vec!["math".into(), "engines".into()])
        );
    }

    #[tokio::test]
    async fn test_selector_extraction_marks_missing_fields_null() {
        let content = PageContent::new("https://example.edu", "<p>nothing</p>");
        let extractor = SelectorExtractor::new(&schema()).unwrap();
        let data = extractor.extract(&content, &required()).await.unwrap();
        assert_eq!(data["name"], FieldValue::Null);
        assert!(!data.values().any(FieldValue::is_populated));
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let mut bad = schema();
        bad.selectors.insert("name".into(), "[[invalid".into());
        assert!(SelectorExtractor::new(&bad).is_err());
    }

    #[test]
    fn test_attribute_selector_parsing() {
        let spec = FieldSelector::parse("a[data-x=\"y@z\"]").unwrap();
        assert!(spec.attr.is_none());
        let spec = FieldSelector::parse("img.logo@src").unwrap();
        assert_eq!(spec.attr.as_deref(), Some("src"));
    }

    struct Canned(&'static str);

    #[async_trait]
    impl ReasoningService for Canned {
        async fn ask(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_reasoning_extraction() {
        let extractor = ReasoningExtractor::new(
            Arc::new(Canned(
                "```json\n{\"name\": \"Ada\", \"homepage\": null, \"tags\": [\"math\"], \"extra\": 1}\n```",
            )),
            schema(),
            1000,
            Duration::from_secs(5),
        );
        let content = PageContent::new("https://example.edu", "<p>Ada, mathematician</p>");

        let data = extractor.extract(&content, &required()).await.unwrap();
        assert_eq!(data["name"], FieldValue::from("Ada"));
        assert_eq!(data["homepage"], FieldValue::Null);
        assert_eq!(data["tags"], FieldValue::List(vec!["math".into()]));
        assert!(!data.contains_key("extra"));
    }

    #[tokio::test]
    async fn test_reasoning_extraction_tolerates_garbage() {
        let extractor = ReasoningExtractor::new(
            Arc::new(Canned("I could not find anything.")),
            schema(),
            1000,
            Duration::from_secs(5),
        );
        let content = PageContent::new("https://example.edu", "<p>Ada</p>");
        let data = extractor.extract(&content, &required()).await.unwrap();
        assert!(!data.values().any(FieldValue::is_populated));
    }
}
