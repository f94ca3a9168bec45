//! Per-proxy HTTP client cache (spec.md §5: "the executor owns one HTTP
//! client per proxy URL, constructed lazily and cached for the process
//! lifetime"). A read-lock-fast-path / write-lock-double-check pattern,
//! keyed by an `Option<String>` proxy URL.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct ClientCache {
    clients: RwLock<HashMap<Option<String>, reqwest::Client>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cached_count(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    pub fn client_for(&self, proxy_url: Option<&str>) -> Result<reqwest::Client, reqwest::Error> {
        let key = proxy_url.map(str::to_string);

        if let Some(client) = self.clients.read().unwrap().get(&key) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().unwrap();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT);
        if let Some(url) = &key {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        let client = builder.build()?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_does_not_grow_the_cache() {
        let cache = ClientCache::new();
        cache.client_for(None).unwrap();
        cache.client_for(None).unwrap();
        assert_eq!(cache.cached_count(), 1);
    }

    #[test]
    fn distinct_proxy_urls_get_distinct_entries() {
        let cache = ClientCache::new();
        cache.client_for(None).unwrap();
        cache.client_for(Some("http://proxy.example:8080")).unwrap();
        assert_eq!(cache.cached_count(), 2);
    }
}
