use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::{Airport, ConfigError, FetchError, Source, WeatherSnapshot};

/// One upstream provider. Implementations parse their vendor format into a
/// `WeatherSnapshot` and classify failures; the engine never sees raw payloads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceGateway: Send + Sync {
    async fn fetch(&self, source: &Source, timeout: Duration) -> Result<WeatherSnapshot, FetchError>;
}

/// Maps the `provider` named in a source's config to the gateway serving it.
#[derive(Default, Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn SourceGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: impl Into<String>, gateway: Arc<dyn SourceGateway>) -> Self {
        self.gateways.insert(provider.into(), gateway);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn SourceGateway>> {
        self.gateways.get(provider).cloned()
    }

    /// Rejects an airport whose sources name a provider nobody registered.
    pub fn check(&self, airport: &Airport) -> Result<(), ConfigError> {
        match airport
            .sources
            .iter()
            .find(|s| !self.gateways.contains_key(&s.provider))
        {
            Some(source) => Err(ConfigError::UnknownProvider {
                airport: airport.id.clone(),
                source_id: source.id.to_string(),
                provider: source.provider.clone(),
            }),
            None => Ok(()),
        }
    }
}
