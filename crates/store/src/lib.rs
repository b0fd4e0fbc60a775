//! kubegate store: availability cache answering "is kind K installed, and how many exist?"
//!
//! Two keyed stores (definition existence, workload count) share one reader/writer
//! lock. Entries are valid while younger than the TTL and are purged by a sweep that
//! runs lazily at the start of a lookup when due, or from [`spawn_sweeper`].

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use kubegate_core::{ListOptions, ResourceIdentity};
use kubegate_kubehub::ClusterClient;
use metrics::counter;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_EVERY: Duration = Duration::from_secs(300);

/// What a failed list means once the definition is known to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListFailure {
    /// Presence is trusted, count is best-effort: `available = true, count = 0`.
    AvailableWithZero,
    /// `available = false, count = 0`.
    Unavailable,
}

/// One kind to probe.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Family key prefix, e.g. `traefik:`; keeps families from colliding.
    pub prefix: &'static str,
    /// Definition object name; `None` for builtin kinds, which skip the existence check.
    pub definition: Option<String>,
    pub identity: ResourceIdentity,
    pub on_list_failure: ListFailure,
}

impl Lookup {
    /// `<prefix><Kind>:<apiVersion>`
    pub fn cache_key(&self) -> String {
        format!("{}{}:{}", self.prefix, self.identity.kind, self.identity.api_version())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub count: usize,
}

#[derive(Debug, Clone, Copy)]
struct Entry<T> {
    value: T,
    at: Instant,
}

impl<T: Copy> Entry<T> {
    fn new(value: T) -> Self { Self { value, at: Instant::now() } }
    fn fresh(&self, ttl: Duration) -> Option<T> { (self.at.elapsed() < ttl).then_some(self.value) }
}

struct Inner {
    definitions: FxHashMap<String, Entry<bool>>,
    workloads: FxHashMap<String, Entry<Availability>>,
    last_sweep: Instant,
}

pub struct AvailabilityCache {
    client: Arc<dyn ClusterClient>,
    ttl: Duration,
    sweep_every: Duration,
    inner: RwLock<Inner>,
}

impl AvailabilityCache {
    pub fn new(client: Arc<dyn ClusterClient>, ttl: Duration, sweep_every: Duration) -> Self {
        Self {
            client,
            ttl,
            sweep_every,
            inner: RwLock::new(Inner { definitions: FxHashMap::default(), workloads: FxHashMap::default(), last_sweep: Instant::now() }),
        }
    }

    pub fn with_defaults(client: Arc<dyn ClusterClient>) -> Self { Self::new(client, DEFAULT_TTL, DEFAULT_SWEEP_EVERY) }

    pub fn ttl(&self) -> Duration { self.ttl }

    /// Resolve a batch. Valid entries are answered from cache; misses are grouped by
    /// cache key so each distinct kind costs at most one existence check and one list,
    /// and distinct kinds are fetched concurrently. Never fails.
    pub async fn get_or_fetch(&self, lookups: &[Lookup]) -> Vec<Availability> {
        self.sweep_if_due().await;
        let t0 = Instant::now();
        let keys: Vec<String> = lookups.iter().map(Lookup::cache_key).collect();
        let mut out: Vec<Option<Availability>> = vec![None; lookups.len()];
        let mut groups: Vec<(usize, SmallVec<[usize; 4]>)> = Vec::new();
        {
            let inner = self.inner.read().await;
            let mut by_key: FxHashMap<&str, usize> = FxHashMap::default();
            for (i, key) in keys.iter().enumerate() {
                if let Some(v) = inner.workloads.get(key).and_then(|e| e.fresh(self.ttl)) {
                    counter!("cache_hits", 1u64);
                    out[i] = Some(v);
                    continue;
                }
                counter!("cache_misses", 1u64);
                match by_key.get(key.as_str()) {
                    Some(&g) => groups[g].1.push(i),
                    None => {
                        by_key.insert(key.as_str(), groups.len());
                        groups.push((i, SmallVec::from_slice(&[i])));
                    }
                }
            }
        }

        if !groups.is_empty() {
            let fetched = futures::future::join_all(groups.iter().map(|(first, _)| self.fetch(&lookups[*first]))).await;
            let mut inner = self.inner.write().await;
            for ((first, members), value) in groups.iter().zip(fetched) {
                inner.workloads.insert(keys[*first].clone(), Entry::new(value));
                for &i in members.iter() {
                    out[i] = Some(value);
                }
            }
            debug!(lookups = lookups.len(), fetched = groups.len(), took_ms = %t0.elapsed().as_millis(), "cache: batch resolved");
        }
        out.into_iter().map(|v| v.unwrap_or_default()).collect()
    }

    /// Convenience for a single lookup.
    pub async fn availability(&self, lookup: &Lookup) -> Availability {
        self.get_or_fetch(std::slice::from_ref(lookup)).await.pop().unwrap_or_default()
    }

    async fn fetch(&self, lookup: &Lookup) -> Availability {
        if let Some(def) = lookup.definition.as_deref() {
            if !self.definition_exists(def).await {
                return Availability { available: false, count: 0 };
            }
        }
        counter!("cache_count_fetches", 1u64);
        let ar = lookup.identity.api_resource();
        match self.client.list(&ar, None, &ListOptions::default()).await {
            Ok(list) => Availability { available: true, count: list.len() },
            Err(e) => {
                warn!(kind = %lookup.identity.kind, error = %e, policy = ?lookup.on_list_failure, "cache: list failed");
                match lookup.on_list_failure {
                    ListFailure::AvailableWithZero => Availability { available: true, count: 0 },
                    ListFailure::Unavailable => Availability { available: false, count: 0 },
                }
            }
        }
    }

    /// Cached definition existence; any read error counts as absent.
    pub async fn definition_exists(&self, name: &str) -> bool {
        if let Some(v) = self.inner.read().await.definitions.get(name).and_then(|e| e.fresh(self.ttl)) {
            counter!("cache_hits", 1u64);
            return v;
        }
        counter!("cache_definition_checks", 1u64);
        let exists = kubegate_schema::definition_exists(self.client.as_ref(), name).await;
        self.inner.write().await.definitions.insert(name.to_string(), Entry::new(exists));
        exists
    }

    /// Valid workload entry for `key`, without fetching.
    pub async fn peek(&self, key: &str) -> Option<Availability> {
        self.inner.read().await.workloads.get(key).and_then(|e| e.fresh(self.ttl))
    }

    /// Valid definition entry for `name`, without fetching.
    pub async fn peek_definition(&self, name: &str) -> Option<bool> {
        self.inner.read().await.definitions.get(name).and_then(|e| e.fresh(self.ttl))
    }

    /// Purge entries older than the TTL from both stores.
    pub async fn sweep(&self) {
        let ttl = self.ttl;
        let mut inner = self.inner.write().await;
        let before = inner.definitions.len() + inner.workloads.len();
        inner.definitions.retain(|_, e| e.at.elapsed() < ttl);
        inner.workloads.retain(|_, e| e.at.elapsed() < ttl);
        inner.last_sweep = Instant::now();
        let after = inner.definitions.len() + inner.workloads.len();
        debug!(purged = before - after, remaining = after, "cache: sweep");
    }

    async fn sweep_if_due(&self) {
        let due = self.inner.read().await.last_sweep.elapsed() >= self.sweep_every;
        if due {
            self.sweep().await;
        }
    }

    /// Reset both stores at once.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.definitions.clear();
        inner.workloads.clear();
        info!("cache: cleared");
    }

    /// `(definition entries, workload entries)`, expired ones included until swept.
    pub async fn len(&self) -> (usize, usize) {
        let inner = self.inner.read().await;
        (inner.definitions.len(), inner.workloads.len())
    }
}

/// Run [`AvailabilityCache::sweep`] every `sweep_every` until the handle is aborted.
pub fn spawn_sweeper(cache: Arc<AvailabilityCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cache.sweep_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cache.sweep().await;
        }
    })
}
