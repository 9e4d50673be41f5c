//! Name-keyed catalogue of available providers. Built once at startup; the
//! set of methods is closed, so lookup failure means misconfiguration or a
//! caller asking for a method we never offered.

use super::types::Provider;
use crate::error::{AppError, AppResult};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> AppResult<Arc<dyn Provider>> {
        self.providers
            .get(&name.trim().to_uppercase())
            .cloned()
            .ok_or_else(|| AppError::UnknownProvider {
                name: name.to_string(),
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(&name.trim().to_uppercase())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::providers::types::{InitiateContext, InitiateOutcome};
    use async_trait::async_trait;

    struct Dummy;

    #[async_trait]
    impl Provider for Dummy {
        fn name(&self) -> &'static str {
            "CARD"
        }
        fn service_key(&self) -> &'static str {
            "psp-card"
        }
        async fn initiate(&self, _ctx: &InitiateContext) -> AppResult<InitiateOutcome> {
            unreachable!("not exercised")
        }
        async fn capture(&self, _execution_id: &str) -> AppResult<bool> {
            unreachable!("not exercised")
        }
    }

    #[test]
    fn lookup_is_case_insensitive_and_total_over_registered_names() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Dummy));

        assert!(registry.has("card"));
        assert_eq!(registry.get(" CARD ").unwrap().name(), "CARD");
        assert!(matches!(
            registry.get("SOFORT"),
            Err(AppError::UnknownProvider { .. })
        ));
        assert_eq!(registry.names(), vec!["CARD".to_string()]);
    }
}
