//! kubegate kubehub: the single seam between kubegate and a cluster API server.
//!
//! Everything above this crate talks to [`ClusterClient`] with type-erased objects
//! addressed by a kube `ApiResource`; [`KubeClusterClient`] is the real backend and
//! [`mock::MockCluster`] an in-memory one used by tests.

#![forbid(unsafe_code)]

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, DeleteParams, PostParams},
    core::{ApiResource, DynamicObject},
    error::ErrorResponse,
    Client,
};
use kubegate_core::{ErasedList, ListOptions, ResourceIdentity};
use metrics::histogram;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub mod mock;

pub use mock::MockCluster;

/// Type-erased CRUD against the cluster. Errors are the raw client errors;
/// callers classify them (see `GateError::from_kube`).
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<DynamicObject, kube::Error>;
    async fn list(&self, ar: &ApiResource, namespace: Option<&str>, opts: &ListOptions) -> Result<ErasedList, kube::Error>;
    async fn create(&self, ar: &ApiResource, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject, kube::Error>;
    async fn replace(&self, ar: &ApiResource, namespace: Option<&str>, name: &str, obj: &DynamicObject) -> Result<DynamicObject, kube::Error>;
    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str, dp: &DeleteParams) -> Result<(), kube::Error>;
}

static KUBE_CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Process-wide kube client built from the default kubeconfig / in-cluster config.
pub async fn get_kube_client() -> Result<Client> {
    let c = KUBE_CLIENT.get_or_try_init(|| async { Client::try_default().await }).await?;
    Ok(c.clone())
}

/// Build a kube API error response, the shape every failure from this crate takes.
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(ErrorResponse { status: "Failure".into(), message: message.into(), reason: reason.into(), code })
}

/// `ApiResource` for definition objects (`customresourcedefinitions`).
pub fn crd_resource() -> ApiResource { ApiResource::erase::<CustomResourceDefinition>(&()) }

pub fn identity_of(ar: &ApiResource) -> ResourceIdentity {
    ResourceIdentity::new(&ar.group, &ar.version, &ar.plural, &ar.kind)
}

/// kube-backed client. Each call is bounded by `call_timeout`.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    call_timeout: Duration,
}

impl KubeClusterClient {
    pub fn new(client: Client, call_timeout: Duration) -> Self { Self { client, call_timeout } }

    pub async fn try_default(call_timeout: Duration) -> Result<Self> {
        Ok(Self::new(get_kube_client().await?, call_timeout))
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }

    async fn bounded<T, F>(&self, verb: &'static str, ar: &ApiResource, fut: F) -> Result<T, kube::Error>
    where
        F: Future<Output = Result<T, kube::Error>> + Send,
    {
        let t0 = Instant::now();
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(res) => {
                let ms = t0.elapsed().as_secs_f64() * 1000.0;
                histogram!("kube_call_ms", ms);
                debug!(verb, plural = %ar.plural, took_ms = %t0.elapsed().as_millis(), ok = res.is_ok(), "kube call");
                res
            }
            Err(_) => {
                warn!(verb, plural = %ar.plural, timeout_secs = self.call_timeout.as_secs(), "kube call timed out");
                Err(api_error(504, "Timeout", format!("{} {} timed out after {:?}", verb, ar.plural, self.call_timeout)))
            }
        }
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<DynamicObject, kube::Error> {
        let api = self.api(ar, namespace);
        self.bounded("get", ar, api.get(name)).await
    }

    async fn list(&self, ar: &ApiResource, namespace: Option<&str>, opts: &ListOptions) -> Result<ErasedList, kube::Error> {
        let api = self.api(ar, namespace);
        let lp = opts.to_list_params();
        let list = self.bounded("list", ar, api.list(&lp)).await?;
        Ok(ErasedList {
            identity: identity_of(ar),
            continue_token: list.metadata.continue_.filter(|c| !c.is_empty()),
            resource_version: list.metadata.resource_version,
            items: list.items,
        })
    }

    async fn create(&self, ar: &ApiResource, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        let api = self.api(ar, namespace);
        let pp = PostParams::default();
        self.bounded("create", ar, api.create(&pp, obj)).await
    }

    async fn replace(&self, ar: &ApiResource, namespace: Option<&str>, name: &str, obj: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        let api = self.api(ar, namespace);
        let pp = PostParams::default();
        self.bounded("replace", ar, api.replace(name, &pp, obj)).await
    }

    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str, dp: &DeleteParams) -> Result<(), kube::Error> {
        let api = self.api(ar, namespace);
        self.bounded("delete", ar, api.delete(name, dp)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_carries_code_and_reason() {
        match api_error(409, "Conflict", "rv mismatch") {
            kube::Error::Api(ae) => {
                assert_eq!(ae.code, 409);
                assert_eq!(ae.reason, "Conflict");
                assert_eq!(ae.message, "rv mismatch");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(kubegate_core::is_not_found(&api_error(404, "NotFound", "gone")));
    }

    #[test]
    fn identity_of_copies_coordinates() {
        let ar = ResourceIdentity::new("traefik.io", "v1alpha1", "middlewares", "Middleware").api_resource();
        let id = identity_of(&ar);
        assert_eq!(id.api_version(), "traefik.io/v1alpha1");
        assert_eq!(id.plural, "middlewares");
    }
}
