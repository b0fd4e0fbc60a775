//! Typed adapters for every registered workload type.
//!
//! Native kinds use the k8s-openapi types; enhanced (OpenKruise) kinds use local
//! serde types that keep every field they do not model in a flattened map, so a
//! read-modify-write never drops data.

use std::marker::PhantomData;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, DynamicObject};
use kubegate_core::{GateError, GateResult, ResourceIdentity};
use kubegate_kubehub::ClusterClient;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::info;

use crate::strategy::{restart_timestamp, RestartStrategy};
use crate::{WorkloadOperations, WorkloadType};

/// OpenKruise workload with a single pod template (CloneSet, Advanced StatefulSet/DaemonSet).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedWorkload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: EnhancedSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplateSpec>,
    #[serde(flatten)]
    pub rest: Map<String, Json>,
}

/// OpenKruise UnitedDeployment: one workload fanned out over several possible sub-templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitedDeployment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: UnitedSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitedSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub template: UnitedTemplates,
    #[serde(flatten)]
    pub rest: Map<String, Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitedTemplates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateful_set_template: Option<SubTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_stateful_set_template: Option<SubTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_set_template: Option<SubTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_template: Option<SubTemplate>,
    #[serde(flatten)]
    pub rest: Map<String, Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,
    #[serde(default)]
    pub spec: SubTemplateSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTemplateSpec {
    #[serde(default)]
    pub template: PodTemplateSpec,
    #[serde(flatten)]
    pub rest: Map<String, Json>,
}

/// Per-type knowledge: where replicas and templates live, and which strategy each template takes.
pub trait Adapter: Send + Sync + 'static {
    type Object: Serialize + DeserializeOwned + Send + Sync;
    const TYPE: WorkloadType;
    /// One-instance-per-eligible-node kinds have no replica count.
    const PER_NODE: bool = false;

    fn api_resource() -> ApiResource;
    fn replicas(obj: &Self::Object) -> Option<i32>;
    fn set_replicas(obj: &mut Self::Object, replicas: i32);
    fn templates(obj: &mut Self::Object) -> Vec<(&mut PodTemplateSpec, RestartStrategy)>;

    /// Extra pre-flight checks beyond the zero-replica rule.
    fn validate(_obj: &Self::Object) -> Result<(), String> { Ok(()) }
}

fn kruise(version: &str, plural: &str, kind: &str) -> ApiResource {
    ResourceIdentity::new("apps.kruise.io", version, plural, kind).api_resource()
}

fn enhanced_templates(obj: &mut EnhancedWorkload) -> Vec<(&mut PodTemplateSpec, RestartStrategy)> {
    obj.spec.template.as_mut().map(|t| vec![(t, RestartStrategy::Env)]).unwrap_or_default()
}

pub struct CloneSetAdapter;
impl Adapter for CloneSetAdapter {
    type Object = EnhancedWorkload;
    const TYPE: WorkloadType = WorkloadType::CloneSet;
    fn api_resource() -> ApiResource { kruise("v1alpha1", "clonesets", "CloneSet") }
    fn replicas(obj: &Self::Object) -> Option<i32> { obj.spec.replicas }
    fn set_replicas(obj: &mut Self::Object, replicas: i32) { obj.spec.replicas = Some(replicas) }
    fn templates(obj: &mut Self::Object) -> Vec<(&mut PodTemplateSpec, RestartStrategy)> { enhanced_templates(obj) }
}

pub struct AdvancedStatefulSetAdapter;
impl Adapter for AdvancedStatefulSetAdapter {
    type Object = EnhancedWorkload;
    const TYPE: WorkloadType = WorkloadType::AdvancedStatefulSet;
    fn api_resource() -> ApiResource { kruise("v1beta1", "statefulsets", "StatefulSet") }
    fn replicas(obj: &Self::Object) -> Option<i32> { obj.spec.replicas }
    fn set_replicas(obj: &mut Self::Object, replicas: i32) { obj.spec.replicas = Some(replicas) }
    fn templates(obj: &mut Self::Object) -> Vec<(&mut PodTemplateSpec, RestartStrategy)> { enhanced_templates(obj) }
}

pub struct AdvancedDaemonSetAdapter;
impl Adapter for AdvancedDaemonSetAdapter {
    type Object = EnhancedWorkload;
    const TYPE: WorkloadType = WorkloadType::AdvancedDaemonSet;
    const PER_NODE: bool = true;
    fn api_resource() -> ApiResource { kruise("v1alpha1", "daemonsets", "DaemonSet") }
    fn replicas(_obj: &Self::Object) -> Option<i32> { None }
    fn set_replicas(_obj: &mut Self::Object, _replicas: i32) {}
    fn templates(obj: &mut Self::Object) -> Vec<(&mut PodTemplateSpec, RestartStrategy)> { enhanced_templates(obj) }
}

pub struct UnitedDeploymentAdapter;
impl Adapter for UnitedDeploymentAdapter {
    type Object = UnitedDeployment;
    const TYPE: WorkloadType = WorkloadType::UnitedDeployment;
    fn api_resource() -> ApiResource { kruise("v1alpha1", "uniteddeployments", "UnitedDeployment") }
    fn replicas(obj: &Self::Object) -> Option<i32> { obj.spec.replicas }
    fn set_replicas(obj: &mut Self::Object, replicas: i32) { obj.spec.replicas = Some(replicas) }

    /// Native sub-templates take the annotation, enhanced ones the env var.
    fn templates(obj: &mut Self::Object) -> Vec<(&mut PodTemplateSpec, RestartStrategy)> {
        let t = &mut obj.spec.template;
        let mut out = Vec::with_capacity(4);
        if let Some(s) = t.stateful_set_template.as_mut() { out.push((&mut s.spec.template, RestartStrategy::Annotation)); }
        if let Some(s) = t.advanced_stateful_set_template.as_mut() { out.push((&mut s.spec.template, RestartStrategy::Env)); }
        if let Some(s) = t.clone_set_template.as_mut() { out.push((&mut s.spec.template, RestartStrategy::Env)); }
        if let Some(s) = t.deployment_template.as_mut() { out.push((&mut s.spec.template, RestartStrategy::Annotation)); }
        out
    }

    fn validate(obj: &Self::Object) -> Result<(), String> {
        let t = &obj.spec.template;
        let any = t.stateful_set_template.is_some()
            || t.advanced_stateful_set_template.is_some()
            || t.clone_set_template.is_some()
            || t.deployment_template.is_some();
        if any {
            Ok(())
        } else {
            Err("UnitedDeployment has no valid template defined (supported: StatefulSet, AdvancedStatefulSet, CloneSet, Deployment)".into())
        }
    }
}

pub struct DeploymentAdapter;
impl Adapter for DeploymentAdapter {
    type Object = Deployment;
    const TYPE: WorkloadType = WorkloadType::Deployment;
    fn api_resource() -> ApiResource { ApiResource::erase::<Deployment>(&()) }
    fn replicas(obj: &Self::Object) -> Option<i32> { obj.spec.as_ref().and_then(|s| s.replicas) }
    fn set_replicas(obj: &mut Self::Object, replicas: i32) { obj.spec.get_or_insert_with(Default::default).replicas = Some(replicas) }
    fn templates(obj: &mut Self::Object) -> Vec<(&mut PodTemplateSpec, RestartStrategy)> {
        obj.spec.as_mut().map(|s| vec![(&mut s.template, RestartStrategy::Annotation)]).unwrap_or_default()
    }
}

pub struct StatefulSetAdapter;
impl Adapter for StatefulSetAdapter {
    type Object = StatefulSet;
    const TYPE: WorkloadType = WorkloadType::StatefulSet;
    fn api_resource() -> ApiResource { ApiResource::erase::<StatefulSet>(&()) }
    fn replicas(obj: &Self::Object) -> Option<i32> { obj.spec.as_ref().and_then(|s| s.replicas) }
    fn set_replicas(obj: &mut Self::Object, replicas: i32) { obj.spec.get_or_insert_with(Default::default).replicas = Some(replicas) }
    fn templates(obj: &mut Self::Object) -> Vec<(&mut PodTemplateSpec, RestartStrategy)> {
        obj.spec.as_mut().map(|s| vec![(&mut s.template, RestartStrategy::Annotation)]).unwrap_or_default()
    }
}

pub struct DaemonSetAdapter;
impl Adapter for DaemonSetAdapter {
    type Object = DaemonSet;
    const TYPE: WorkloadType = WorkloadType::DaemonSet;
    const PER_NODE: bool = true;
    fn api_resource() -> ApiResource { ApiResource::erase::<DaemonSet>(&()) }
    fn replicas(_obj: &Self::Object) -> Option<i32> { None }
    fn set_replicas(_obj: &mut Self::Object, _replicas: i32) {}
    fn templates(obj: &mut Self::Object) -> Vec<(&mut PodTemplateSpec, RestartStrategy)> {
        obj.spec.as_mut().map(|s| vec![(&mut s.template, RestartStrategy::Annotation)]).unwrap_or_default()
    }
}

fn decode<T: DeserializeOwned>(obj: &DynamicObject, what: &str) -> GateResult<T> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| GateError::Upstream(format!("decoding {}: {}", what, e)))
}

fn encode<T: Serialize>(obj: &T, what: &str) -> GateResult<DynamicObject> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| GateError::Upstream(format!("encoding {}: {}", what, e)))
}

/// Scale/restart implementation shared by every adapter.
pub struct Workload<A: Adapter> {
    client: Arc<dyn ClusterClient>,
    _adapter: PhantomData<fn() -> A>,
}

impl<A: Adapter> Workload<A> {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self { Self { client, _adapter: PhantomData } }

    async fn fetch(&self, namespace: &str, name: &str) -> GateResult<A::Object> {
        let what = format!("{} {}/{}", A::TYPE, namespace, name);
        let obj = self
            .client
            .get(&A::api_resource(), Some(namespace), name)
            .await
            .map_err(|e| GateError::from_kube(e, &what))?;
        decode(&obj, &what)
    }

    async fn store(&self, namespace: &str, name: &str, obj: &A::Object) -> GateResult<()> {
        let what = format!("{} {}/{}", A::TYPE, namespace, name);
        let dynobj = encode(obj, &what)?;
        self.client
            .replace(&A::api_resource(), Some(namespace), name, &dynobj)
            .await
            .map_err(|e| GateError::from_kube(e, &what))?;
        Ok(())
    }

    fn check(obj: &A::Object, namespace: &str, name: &str) -> GateResult<()> {
        if !A::PER_NODE && A::replicas(obj) == Some(0) {
            return Err(GateError::BadRequest(format!("cannot restart {} {}/{} with 0 replicas", A::TYPE, namespace, name)));
        }
        A::validate(obj).map_err(GateError::BadRequest)
    }
}

#[async_trait::async_trait]
impl<A: Adapter> WorkloadOperations for Workload<A> {
    fn workload_type(&self) -> WorkloadType { A::TYPE }

    async fn scale(&self, namespace: &str, name: &str, replicas: i32) -> GateResult<i32> {
        if A::PER_NODE {
            return Err(GateError::Unsupported(format!("{} does not support replica scaling", A::TYPE)));
        }
        let mut obj = self.fetch(namespace, name).await?;
        A::set_replicas(&mut obj, replicas);
        self.store(namespace, name, &obj).await?;
        info!(workload = %A::TYPE, ns = %namespace, name = %name, replicas, "ops: scaled");
        Ok(replicas)
    }

    async fn validate_restart(&self, namespace: &str, name: &str) -> GateResult<()> {
        let obj = self.fetch(namespace, name).await?;
        Self::check(&obj, namespace, name)
    }

    async fn restart(&self, namespace: &str, name: &str) -> GateResult<String> {
        self.validate_restart(namespace, name).await?;
        let mut obj = self.fetch(namespace, name).await?;
        let ts = restart_timestamp();
        let templates = A::templates(&mut obj);
        if templates.is_empty() {
            return Err(GateError::BadRequest(format!("{} {}/{} has no pod template", A::TYPE, namespace, name)));
        }
        for (template, strategy) in templates {
            strategy.apply(template, &ts);
        }
        self.store(namespace, name, &obj).await?;
        info!(workload = %A::TYPE, ns = %namespace, name = %name, restarted_at = %ts, "ops: restarted");
        Ok(ts)
    }
}
