use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru_time_cache::LruCache;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;
use url::Url;

use crate::client::Client;
use crate::config::{DatasourceSettings, HttpMethod};
use crate::runtime_error::{RuntimeError, RuntimeResult};

const CLIENT_CACHE_MAX_LEN: usize = 500;

/// Builds a [Client] for a given set of outgoing headers.
pub trait ClientProvider: Send + Sync {
    fn build(&self, headers: &HashMap<String, String>) -> RuntimeResult<Client>;
}

/// Creates a `reqwest` client per header set, sending the headers on every request.
pub struct DefaultClientProvider {
    base_url: Url,
    method: HttpMethod,
    timeout: Option<Duration>,
    custom_params: Vec<(String, String)>,
}

impl DefaultClientProvider {
    pub fn new(settings: &DatasourceSettings) -> RuntimeResult<Self> {
        Ok(Self {
            base_url: settings.base_url()?,
            method: settings.http_method,
            timeout: settings.query_timeout()?,
            custom_params: settings.custom_query_params(),
        })
    }
}

impl ClientProvider for DefaultClientProvider {
    fn build(&self, headers: &HashMap<String, String>) -> RuntimeResult<Client> {
        let mut default_headers = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RuntimeError::ClientConstruction(format!("header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RuntimeError::ClientConstruction(format!("header {name}: {e}")))?;
            default_headers.insert(name, value);
        }
        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .build()
            .map_err(|e| RuntimeError::ClientConstruction(e.to_string()))?;
        Ok(Client::new(Arc::new(http), self.base_url.clone(), self.method)
            .with_timeout(self.timeout)
            .with_custom_params(self.custom_params.clone()))
    }
}

/// LRU cache of clients keyed by the outgoing header set.
///
/// The key is built from header values only, so two header sets carrying the same values
/// under different names share a client.
pub struct ClientCache {
    provider: Box<dyn ClientProvider>,
    requests: AtomicU64,
    misses: AtomicU64,
    lru: Mutex<LruCache<String, Arc<Client>>>,
}

impl ClientCache {
    pub fn new(provider: Box<dyn ClientProvider>) -> Self {
        Self::with_capacity(provider, CLIENT_CACHE_MAX_LEN)
    }

    pub fn with_capacity(provider: Box<dyn ClientProvider>, capacity: usize) -> Self {
        ClientCache {
            provider,
            requests: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            lru: Mutex::new(LruCache::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.lock().is_empty()
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns the cached client for `headers`, building one on a miss. The lock is not held
    /// while building, so concurrent misses may build twice; the first one stored wins.
    /// Failed builds are not cached.
    pub fn get_client(&self, headers: &HashMap<String, String>) -> RuntimeResult<Arc<Client>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let key = cache_key(headers);
        if let Some(client) = self.lru.lock().get(&key) {
            return Ok(Arc::clone(client));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(headers = headers.len(), "building backend client");
        let client = Arc::new(self.provider.build(headers)?);

        let mut lru = self.lru.lock();
        if let Some(existing) = lru.get(&key) {
            return Ok(Arc::clone(existing));
        }
        lru.insert(key, Arc::clone(&client));
        Ok(client)
    }
}

fn cache_key(headers: &HashMap<String, String>) -> String {
    let mut values: Vec<&str> = headers.values().map(String::as_str).collect();
    values.sort_unstable();
    values.concat()
}
