//! Service discovery interface.
//!
//! The directory itself is an external collaborator; the orchestrator only
//! depends on `lookup(service) -> [endpoint]`. An empty answer is valid and
//! means "currently unavailable" — the invoker treats it as fatal-fast.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    async fn lookup(&self, service: &str) -> AppResult<Vec<Endpoint>>;
}

/// Directory backed by static configuration. Entries come from
/// `DISCOVERY_<SERVICE>` environment variables holding comma-separated base
/// URLs, e.g. `DISCOVERY_PSP_CARD=https://bank-a:8082,https://bank-b:8082`.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    entries: HashMap<String, Vec<Endpoint>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, service: &str, urls: &[&str]) {
        self.entries.insert(
            normalize(service),
            urls.iter().map(|u| Endpoint::new(*u)).collect(),
        );
    }

    pub fn from_env() -> AppResult<Self> {
        let mut directory = Self::new();
        for (key, value) in std::env::vars() {
            if let Some(service) = key.strip_prefix("DISCOVERY_") {
                let endpoints: Vec<Endpoint> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(Endpoint::new)
                    .collect();
                for endpoint in &endpoints {
                    if !endpoint.base_url.starts_with("http://")
                        && !endpoint.base_url.starts_with("https://")
                    {
                        return Err(AppError::validation(
                            format!("invalid endpoint url in {}: {}", key, endpoint.base_url),
                            Some(key.as_str()),
                        ));
                    }
                }
                directory.entries.insert(normalize(service), endpoints);
            }
        }
        Ok(directory)
    }
}

#[async_trait]
impl ServiceDirectory for StaticDirectory {
    async fn lookup(&self, service: &str) -> AppResult<Vec<Endpoint>> {
        Ok(self
            .entries
            .get(&normalize(service))
            .cloned()
            .unwrap_or_default())
    }
}

fn normalize(service: &str) -> String {
    service.trim().to_uppercase().replace('-', "_")
}
