//! Source fetch contracts, typed upstream records, and client implementations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rcs_core::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

mod fixture;
mod http;
pub mod records;

pub use fixture::FixtureSourceClient;
pub use http::{
    classify_reqwest_error, classify_status, AccessToken, BackoffPolicy, HttpSourceClient,
    HttpSourceConfig, RetryDisposition, TokenCache,
};

pub const CRATE_NAME: &str = "rcs-source";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source client misconfigured: {0}")]
    Config(String),
    #[error("authentication failed with http status {status}")]
    Auth { status: u16 },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected payload from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("fixture {path} unreadable: {err}")]
    Fixture {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("endpoint {0} unavailable")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub rows: u64,
    pub pages: u64,
}

/// One bulk response. Pagination metadata is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePage {
    #[serde(default)]
    pub data: Vec<JsonValue>,
    #[serde(default)]
    pub page: Option<PageInfo>,
}

impl SourcePage {
    pub fn new(data: Vec<JsonValue>) -> Self {
        Self { data, page: None }
    }

    /// Accepts `{"data": [...], "page": {...}}` or a bare array.
    pub fn from_json(endpoint: &str, value: JsonValue) -> Result<Self, SourceError> {
        match value {
            JsonValue::Array(data) => Ok(Self::new(data)),
            other @ JsonValue::Object(_) => {
                serde_json::from_value(other).map_err(|err| SourceError::Decode {
                    endpoint: endpoint.to_string(),
                    message: err.to_string(),
                })
            }
            other => Err(SourceError::Decode {
                endpoint: endpoint.to_string(),
                message: format!("expected object or array, got {other}"),
            }),
        }
    }
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch the full record set behind `endpoint`.
    async fn fetch(&self, endpoint: &str) -> Result<SourcePage, SourceError>;
}

/// Endpoint path per synchronized entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointMap {
    paths: BTreeMap<EntityKind, String>,
}

impl Default for EndpointMap {
    fn default() -> Self {
        let paths = [
            (EntityKind::MeasureUnit, "v1/product/purchases/units/measure"),
            (EntityKind::Category, "v1/product/purchases/categories"),
            (EntityKind::RecipeCategory, "v1/recipes/categories"),
            (EntityKind::RecipeFamily, "v1/recipes/families"),
            (EntityKind::Supplier, "v1/suppliers"),
            (EntityKind::Ingredient, "v1/product/purchases"),
            (EntityKind::Recipe, "v2/recipes"),
        ]
        .into_iter()
        .map(|(kind, path)| (kind, path.to_string()))
        .collect();
        Self { paths }
    }
}

#[derive(Debug, Default, Deserialize)]
struct EndpointOverrides {
    #[serde(default)]
    endpoints: BTreeMap<EntityKind, String>,
}

impl EndpointMap {
    /// Endpoint for `kind`. Kinds that are never fetched return `"(local)"`.
    pub fn get(&self, kind: EntityKind) -> &str {
        self.paths.get(&kind).map(String::as_str).unwrap_or("(local)")
    }

    pub fn set(&mut self, kind: EntityKind, path: impl Into<String>) {
        self.paths.insert(kind, path.into());
    }

    /// Defaults overlaid with the `endpoints:` table of a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let overrides: EndpointOverrides =
            serde_yaml::from_str(yaml).context("parsing endpoint overrides")?;
        let mut map = Self::default();
        for (kind, path) in overrides.endpoints {
            if !map.paths.contains_key(&kind) {
                warn!(%kind, "ignoring endpoint override for a kind that is not fetched");
                continue;
            }
            let path = path.trim().trim_start_matches('/').to_string();
            if path.is_empty() {
                anyhow::bail!("empty endpoint override for {kind}");
            }
            map.paths.insert(kind, path);
        }
        Ok(map)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }
}

/// Canned responses keyed by endpoint, for tests and demos.
#[derive(Debug, Default)]
pub struct InMemorySource {
    pages: HashMap<String, Vec<JsonValue>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, endpoint: impl Into<String>, records: Vec<JsonValue>) -> Self {
        self.pages.insert(endpoint.into(), records);
        self
    }

    /// Fetching `endpoint` will fail with [`SourceError::Unavailable`].
    pub fn failing(mut self, endpoint: impl Into<String>) -> Self {
        self.failing.insert(endpoint.into());
        self
    }

    /// Endpoints fetched so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl SourceClient for InMemorySource {
    async fn fetch(&self, endpoint: &str) -> Result<SourcePage, SourceError> {
        self.calls.lock().await.push(endpoint.to_string());
        if self.failing.contains(endpoint) {
            return Err(SourceError::Unavailable(endpoint.to_string()));
        }
        Ok(SourcePage::new(
            self.pages.get(endpoint).cloned().unwrap_or_default(),
        ))
    }
}

/// Placeholder for commands that never fetch. Every fetch fails with the
/// configuration problem that kept a real client from being built.
#[derive(Debug, Clone)]
pub struct UnconfiguredSource {
    reason: String,
}

impl UnconfiguredSource {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SourceClient for UnconfiguredSource {
    async fn fetch(&self, _endpoint: &str) -> Result<SourcePage, SourceError> {
        Err(SourceError::Config(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_accepts_wrapped_and_bare_payloads() {
        let wrapped = SourcePage::from_json(
            "v1/suppliers",
            json!({"data": [{"id": 1}], "page": {"rows": 1, "pages": 1}}),
        )
        .unwrap();
        assert_eq!(wrapped.data.len(), 1);
        assert_eq!(wrapped.page, Some(PageInfo { rows: 1, pages: 1 }));

        let bare = SourcePage::from_json("v1/suppliers", json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(bare.data.len(), 2);

        assert!(matches!(
            SourcePage::from_json("v1/suppliers", json!("nope")),
            Err(SourceError::Decode { .. })
        ));
    }

    #[test]
    fn endpoint_overrides_replace_only_named_kinds() {
        let map = EndpointMap::from_yaml_str(
            "endpoints:\n  recipe: /v1/recipes\n  recipe_line: ignored\n",
        )
        .unwrap();
        assert_eq!(map.get(EntityKind::Recipe), "v1/recipes");
        assert_eq!(map.get(EntityKind::Supplier), "v1/suppliers");
        assert_eq!(map.get(EntityKind::RecipeLine), "(local)");
    }

    #[tokio::test]
    async fn unconfigured_source_fails_every_fetch() {
        let source = UnconfiguredSource::new("SOURCE_API_URL must be set");
        let err = source.fetch("v1/suppliers").await.unwrap_err();
        assert!(err.to_string().contains("SOURCE_API_URL must be set"));
    }

    #[test]
    fn empty_override_is_rejected() {
        assert!(EndpointMap::from_yaml_str("endpoints:\n  supplier: \"  \"\n").is_err());
    }

    #[tokio::test]
    async fn in_memory_source_records_calls_and_failures() {
        let source = InMemorySource::new()
            .with("a", vec![json!({"id": 1})])
            .failing("b");
        assert_eq!(source.fetch("a").await.unwrap().data.len(), 1);
        assert!(source.fetch("c").await.unwrap().data.is_empty());
        assert!(matches!(source.fetch("b").await, Err(SourceError::Unavailable(_))));
        assert_eq!(source.calls().await, vec!["a", "c", "b"]);
    }
}
