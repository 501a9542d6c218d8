use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::logging::Timer;
use crate::rules::RuleSet;
use crate::stripper::Stripper;

/// Shared handle to the active rule table.
///
/// The table is only ever swapped as a whole, so a [`Stripper`] taken from
/// the store keeps a consistent snapshot while a refresh runs.
#[derive(Clone)]
pub struct RuleStore {
    rules: Arc<RwLock<Arc<RuleSet>>>,
    source: Option<String>,
}

impl RuleStore {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Arc::new(RwLock::new(Arc::new(rules))),
            source: None,
        }
    }

    /// Loads the table from `source`, or the built-in table when there is none.
    pub async fn load(source: Option<&str>) -> Result<Self> {
        let store = Self {
            rules: Arc::new(RwLock::new(Arc::new(RuleSet::default_rules()))),
            source: source.map(str::to_string),
        };
        store.refresh().await?;
        Ok(store)
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Re-reads the configured source and swaps the table in.
    ///
    /// On failure the current table stays active.
    pub async fn refresh(&self) -> Result<usize> {
        let Some(source) = &self.source else {
            return Ok(self.snapshot().hosts().count());
        };

        let _timer = Timer::new("rules_refresh");
        info!("Fetching rules from {}", source);
        let text = fetch_source(source).await?;
        let rules = RuleSet::from_json(&text).context("Failed to parse rule table")?;
        if rules.is_empty() {
            warn!(source = %source, "Loaded rule table is empty; URLs will pass through unchanged");
        }

        let count = rules.hosts().count();
        self.replace(rules);
        info!("Loaded {} host rules", count);
        Ok(count)
    }

    pub fn replace(&self, rules: RuleSet) {
        let mut w = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        *w = Arc::new(rules);
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stripper(&self) -> Stripper {
        Stripper::new(self.snapshot())
    }
}

async fn fetch_source(source: &str) -> Result<String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let resp = reqwest::Client::new()
            .get(source)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", source))?
            .error_for_status()?;
        Ok(resp.text().await?)
    } else {
        tokio::fs::read_to_string(Path::new(source))
            .await
            .with_context(|| format!("Failed to read {}", source))
    }
}
