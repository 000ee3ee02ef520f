// # Memory Resolver
//
// Keeps per-source resolver contributions in memory. Stands in for the
// resolvconf tool in tests and in the simulation backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::traits::{Resolver, ResolverConfig, LOOPBACK_SOURCE};
use crate::Result;

/// In-memory resolver list
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    sources: Arc<RwLock<BTreeMap<String, ResolverConfig>>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contribution of one source
    pub async fn get(&self, source: &str) -> Option<ResolverConfig> {
        self.sources.read().await.get(source).cloned()
    }
}

#[async_trait]
impl Resolver for MemoryResolver {
    async fn add(&self, source: &str, config: &ResolverConfig) -> Result<()> {
        self.sources
            .write()
            .await
            .insert(source.to_string(), config.clone());
        Ok(())
    }

    async fn delete(&self, source: &str) -> Result<()> {
        self.sources.write().await.remove(source);
        Ok(())
    }

    async fn sources(&self) -> Result<Vec<String>> {
        Ok(self.sources.read().await.keys().cloned().collect())
    }

    async fn list(&self) -> Result<ResolverConfig> {
        let guard = self.sources.read().await;

        // Loopback first, like the merged resolv.conf
        let ordered = guard
            .get(LOOPBACK_SOURCE)
            .into_iter()
            .chain(guard.iter().filter(|(k, _)| *k != LOOPBACK_SOURCE).map(|(_, v)| v));

        let text: String = ordered.map(|config| config.to_text()).collect();
        Ok(ResolverConfig::parse(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_merged_listing() {
        let resolver = MemoryResolver::new();
        resolver
            .add(
                "em0",
                &ResolverConfig::new(vec!["192.168.1.1".parse().unwrap()], vec!["lan".into()]),
            )
            .await
            .unwrap();
        resolver
            .add(
                LOOPBACK_SOURCE,
                &ResolverConfig::new(vec!["10.0.0.1".parse().unwrap()], vec![]),
            )
            .await
            .unwrap();

        let merged = resolver.list().await.unwrap();
        assert_eq!(
            merged.nameservers,
            vec![
                "10.0.0.1".parse::<std::net::IpAddr>().unwrap(),
                "192.168.1.1".parse().unwrap()
            ]
        );
        assert_eq!(merged.search, vec!["lan"]);

        resolver.delete("em0").await.unwrap();
        assert_eq!(resolver.sources().await.unwrap(), vec![LOOPBACK_SOURCE]);
    }
}
