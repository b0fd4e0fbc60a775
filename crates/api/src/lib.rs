//! kubegate public API façade (in-process).
//!
//! Frontends (the CLI today) depend on [`GateApi`]. [`InProcApi`] wires the resolver,
//! accessor, dispatcher and availability cache over one shared [`ClusterClient`].

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::core::DynamicObject;
use kubegate_access::DynamicAccessor;
use kubegate_core::{ErasedList, GateError, GateResult, ListOptions, ResourceDefinition};
use kubegate_kubehub::{ClusterClient, KubeClusterClient};
use kubegate_ops::{OperationDispatcher, OperationKind, OperationRequest, OperationResult, ScaleBody};
use kubegate_schema::StaticKind;
use kubegate_store::AvailabilityCache;
use serde_json::Value as Json;
use tracing::info;

pub mod families;

pub use families::{FamilyStatus, WorkloadFamily, WorkloadStatus};

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cache_ttl: Duration,
    pub cache_sweep_every: Duration,
    pub call_timeout: Duration,
    pub metrics_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl: kubegate_store::DEFAULT_TTL,
            cache_sweep_every: kubegate_store::DEFAULT_SWEEP_EVERY,
            call_timeout: Duration::from_secs(30),
            metrics_addr: None,
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_secs).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            cache_ttl: env_secs("KUBEGATE_CACHE_TTL_SECS", d.cache_ttl),
            cache_sweep_every: env_secs("KUBEGATE_CACHE_SWEEP_SECS", d.cache_sweep_every),
            call_timeout: env_secs("KUBEGATE_CALL_TIMEOUT_SECS", d.call_timeout),
            metrics_addr: std::env::var("KUBEGATE_METRICS_ADDR").ok(),
        }
    }
}

/// kubegate API surface.
#[async_trait::async_trait]
pub trait GateApi: Send + Sync {
    /// List objects of the custom kind declared by `definition` (e.g. `clonesets.apps.kruise.io`).
    /// `None` or `_all` lists across namespaces.
    async fn cr_list(&self, definition: &str, namespace: Option<&str>, opts: &ListOptions) -> GateResult<ErasedList>;
    async fn cr_get(&self, definition: &str, namespace: Option<&str>, name: &str) -> GateResult<DynamicObject>;
    async fn cr_create(&self, definition: &str, namespace: Option<&str>, body: Json) -> GateResult<DynamicObject>;
    async fn cr_update(&self, definition: &str, namespace: Option<&str>, name: &str, body: Json) -> GateResult<DynamicObject>;
    async fn cr_delete(&self, definition: &str, namespace: Option<&str>, name: &str) -> GateResult<()>;

    /// Same operations for a kind from the static catalog, addressed by its route name (e.g. `middlewares`).
    async fn kind_list(&self, kind: &str, namespace: Option<&str>, opts: &ListOptions) -> GateResult<ErasedList>;
    async fn kind_get(&self, kind: &str, namespace: Option<&str>, name: &str) -> GateResult<DynamicObject>;
    async fn kind_create(&self, kind: &str, namespace: Option<&str>, body: Json) -> GateResult<DynamicObject>;
    async fn kind_update(&self, kind: &str, namespace: Option<&str>, name: &str, body: Json) -> GateResult<DynamicObject>;
    async fn kind_delete(&self, kind: &str, namespace: Option<&str>, name: &str) -> GateResult<()>;

    /// Scale from a `{"replicas": n}` body. A malformed body is an error; operation failures are data.
    async fn scale(&self, workload: &str, namespace: &str, name: &str, body: &Json) -> GateResult<OperationResult>;
    async fn restart(&self, workload: &str, namespace: &str, name: &str) -> OperationResult;
    async fn execute(&self, req: &OperationRequest) -> OperationResult;

    /// Installed flag, per-kind availability and controller version for a family.
    async fn family_status(&self, family: WorkloadFamily) -> GateResult<FamilyStatus>;

    async fn clear_cache(&self);
}

pub struct InProcApi {
    client: Arc<dyn ClusterClient>,
    accessor: DynamicAccessor,
    dispatcher: OperationDispatcher,
    cache: Arc<AvailabilityCache>,
    config: Config,
}

impl InProcApi {
    pub fn new(client: Arc<dyn ClusterClient>, config: Config) -> Self {
        let cache = Arc::new(AvailabilityCache::new(client.clone(), config.cache_ttl, config.cache_sweep_every));
        Self {
            accessor: DynamicAccessor::new(client.clone()),
            dispatcher: OperationDispatcher::new(client.clone()),
            cache,
            client,
            config,
        }
    }

    /// Connect to the cluster from the ambient kubeconfig or in-cluster environment.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let client = KubeClusterClient::try_default(config.call_timeout).await?;
        info!(timeout_secs = config.call_timeout.as_secs(), ttl_secs = config.cache_ttl.as_secs(), "api: connected");
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn config(&self) -> &Config { &self.config }

    pub fn cache(&self) -> &Arc<AvailabilityCache> { &self.cache }

    /// Background sweep for long-running frontends; lookups also sweep lazily.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> { kubegate_store::spawn_sweeper(self.cache.clone()) }

    async fn definition(&self, name: &str) -> GateResult<ResourceDefinition> {
        kubegate_schema::resolve(self.client.as_ref(), name).await
    }

    async fn static_definition(&self, kind: &str) -> GateResult<ResourceDefinition> {
        let sk: &StaticKind = kubegate_schema::find_static_kind(kind)
            .ok_or_else(|| GateError::NotFound(format!("unknown kind: {}", kind)))?;
        kubegate_schema::resolve_static(self.client.as_ref(), sk).await
    }
}

#[async_trait::async_trait]
impl GateApi for InProcApi {
    async fn cr_list(&self, definition: &str, namespace: Option<&str>, opts: &ListOptions) -> GateResult<ErasedList> {
        let def = self.definition(definition).await?;
        self.accessor.list(&def, namespace, opts).await
    }

    async fn cr_get(&self, definition: &str, namespace: Option<&str>, name: &str) -> GateResult<DynamicObject> {
        let def = self.definition(definition).await?;
        self.accessor.get(&def, namespace, name).await
    }

    async fn cr_create(&self, definition: &str, namespace: Option<&str>, body: Json) -> GateResult<DynamicObject> {
        let def = self.definition(definition).await?;
        self.accessor.create(&def, namespace, body).await
    }

    async fn cr_update(&self, definition: &str, namespace: Option<&str>, name: &str, body: Json) -> GateResult<DynamicObject> {
        let def = self.definition(definition).await?;
        self.accessor.update(&def, namespace, name, body).await
    }

    async fn cr_delete(&self, definition: &str, namespace: Option<&str>, name: &str) -> GateResult<()> {
        let def = self.definition(definition).await?;
        self.accessor.delete(&def, namespace, name).await
    }

    async fn kind_list(&self, kind: &str, namespace: Option<&str>, opts: &ListOptions) -> GateResult<ErasedList> {
        let def = self.static_definition(kind).await?;
        self.accessor.list(&def, namespace, opts).await
    }

    async fn kind_get(&self, kind: &str, namespace: Option<&str>, name: &str) -> GateResult<DynamicObject> {
        let def = self.static_definition(kind).await?;
        self.accessor.get(&def, namespace, name).await
    }

    async fn kind_create(&self, kind: &str, namespace: Option<&str>, body: Json) -> GateResult<DynamicObject> {
        let def = self.static_definition(kind).await?;
        self.accessor.create(&def, namespace, body).await
    }

    async fn kind_update(&self, kind: &str, namespace: Option<&str>, name: &str, body: Json) -> GateResult<DynamicObject> {
        let def = self.static_definition(kind).await?;
        self.accessor.update(&def, namespace, name, body).await
    }

    async fn kind_delete(&self, kind: &str, namespace: Option<&str>, name: &str) -> GateResult<()> {
        let def = self.static_definition(kind).await?;
        self.accessor.delete(&def, namespace, name).await
    }

    async fn scale(&self, workload: &str, namespace: &str, name: &str, body: &Json) -> GateResult<OperationResult> {
        let replicas = ScaleBody::parse(body)?;
        let req = OperationRequest {
            workload_type: workload.to_string(),
            operation: OperationKind::Scale,
            namespace: namespace.to_string(),
            name: name.to_string(),
            replicas: Some(replicas),
        };
        Ok(self.dispatcher.execute(&req).await)
    }

    async fn restart(&self, workload: &str, namespace: &str, name: &str) -> OperationResult {
        let req = OperationRequest {
            workload_type: workload.to_string(),
            operation: OperationKind::Restart,
            namespace: namespace.to_string(),
            name: name.to_string(),
            replicas: None,
        };
        self.dispatcher.execute(&req).await
    }

    async fn execute(&self, req: &OperationRequest) -> OperationResult { self.dispatcher.execute(req).await }

    async fn family_status(&self, family: WorkloadFamily) -> GateResult<FamilyStatus> {
        let t0 = Instant::now();
        let probes = family.probes();
        let availability = self.cache.get_or_fetch(&family.lookups()).await;
        let mut status = FamilyStatus::from_probes(&probes, &availability);
        if status.installed {
            status.version = families::detect_version(self.client.as_ref(), family.version_sources()).await;
        }
        info!(family = %family, installed = status.installed, version = ?status.version, took_ms = %t0.elapsed().as_millis(), "api: status ok");
        Ok(status)
    }

    async fn clear_cache(&self) { self.cache.clear().await; }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let c = Config::default();
        assert_eq!(c.cache_ttl, Duration::from_secs(30));
        assert_eq!(c.cache_sweep_every, Duration::from_secs(300));
        assert_eq!(c.call_timeout, Duration::from_secs(30));
        assert!(c.metrics_addr.is_none());
    }

    #[test]
    fn env_secs_falls_back_on_garbage() {
        std::env::set_var("KUBEGATE_TEST_SECS_GARBAGE", "soon");
        assert_eq!(env_secs("KUBEGATE_TEST_SECS_GARBAGE", Duration::from_secs(7)), Duration::from_secs(7));
        std::env::set_var("KUBEGATE_TEST_SECS_OK", "12");
        assert_eq!(env_secs("KUBEGATE_TEST_SECS_OK", Duration::from_secs(7)), Duration::from_secs(12));
    }
}
