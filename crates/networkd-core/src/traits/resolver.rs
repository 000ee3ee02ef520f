// # Resolver List
//
// Per-source resolver contributions merged by an external tool into the
// system resolver configuration. The loopback source (`lo0`) carries the
// statically configured servers; every DHCP interface may contribute its own.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Source name of the statically configured resolver entries
pub const LOOPBACK_SOURCE: &str = "lo0";

/// One resolver contribution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(rename = "addresses")]
    pub nameservers: Vec<IpAddr>,
    pub search: Vec<String>,
}

impl ResolverConfig {
    pub fn new(nameservers: Vec<IpAddr>, search: Vec<String>) -> Self {
        Self {
            nameservers,
            search,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty() && self.search.is_empty()
    }

    /// Render the `search ...` / `nameserver ...` text format
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if !self.search.is_empty() {
            out.push_str("search ");
            out.push_str(&self.search.join(" "));
            out.push('\n');
        }
        for ns in &self.nameservers {
            out.push_str(&format!("nameserver {}\n", ns));
        }
        out
    }

    /// Parse the text format back
    ///
    /// Blank lines and `#` comments are skipped, as are nameserver entries
    /// that are not addresses. Duplicates keep their first position.
    pub fn parse(text: &str) -> Self {
        let mut config = ResolverConfig::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("nameserver") => {
                    if let Some(addr) = tokens.next().and_then(|t| t.parse::<IpAddr>().ok()) {
                        if !config.nameservers.contains(&addr) {
                            config.nameservers.push(addr);
                        }
                    }
                }
                Some("search") => {
                    for domain in tokens {
                        if !config.search.iter().any(|d| d == domain) {
                            config.search.push(domain.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        config
    }
}

/// Trait for resolver list implementations
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Replace the contribution of `source`
    async fn add(&self, source: &str, config: &ResolverConfig) -> Result<()>;

    /// Remove the contribution of `source`
    async fn delete(&self, source: &str) -> Result<()>;

    /// Names of every source with a contribution
    async fn sources(&self) -> Result<Vec<String>>;

    /// Merged view of every contribution
    async fn list(&self) -> Result<ResolverConfig>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let text = "# resolv.conf from lo0\n\nsearch example.com lan\nnameserver 10.0.0.1\nnameserver bogus\nnameserver 10.0.0.1\n";
        let config = ResolverConfig::parse(text);
        assert_eq!(config.nameservers, vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(config.search, vec!["example.com", "lan"]);
    }

    #[test]
    fn test_text_form() {
        let config = ResolverConfig::new(
            vec!["8.8.8.8".parse().unwrap()],
            vec!["example.com".into()],
        );
        assert_eq!(config.to_text(), "search example.com\nnameserver 8.8.8.8\n");
        assert_eq!(ResolverConfig::parse(&config.to_text()), config);
    }
}
