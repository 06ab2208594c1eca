use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{SourceClient, SourceError, SourcePage};

/// Reads `<root>/<endpoint>.json` instead of calling the API.
///
/// `v1/product/purchases` resolves to `<root>/v1/product/purchases.json`, so a
/// captured API tree can be replayed as-is.
#[derive(Debug, Clone)]
pub struct FixtureSourceClient {
    root: PathBuf,
}

impl FixtureSourceClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fixture_path(&self, endpoint: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", endpoint.trim_matches('/')))
    }
}

#[async_trait]
impl SourceClient for FixtureSourceClient {
    async fn fetch(&self, endpoint: &str) -> Result<SourcePage, SourceError> {
        let path = self.fixture_path(endpoint);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| SourceError::Fixture {
                path: path.clone(),
                err,
            })?;
        let value: JsonValue = serde_json::from_str(&raw).map_err(|err| SourceError::Decode {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        })?;
        let page = SourcePage::from_json(endpoint, value)?;
        debug!(endpoint, path = %path.display(), records = page.data.len(), "loaded fixture");
        Ok(page)
    }
}
