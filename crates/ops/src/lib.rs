//! kubegate ops: scale and restart over a closed set of workload types.
//!
//! Each workload type is registered once in an [`OperationDispatcher`]; callers go
//! through [`OperationDispatcher::execute`], which always returns an
//! [`OperationResult`] and never an error.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use kubegate_core::{GateError, GateResult};
use kubegate_kubehub::ClusterClient;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub mod strategy;
pub mod workloads;

pub use strategy::{restart_timestamp, RestartStrategy, RESTART_ANNOTATION, RESTART_ENV};

use workloads::{
    AdvancedDaemonSetAdapter, AdvancedStatefulSetAdapter, CloneSetAdapter, DaemonSetAdapter, DeploymentAdapter,
    StatefulSetAdapter, UnitedDeploymentAdapter, Workload,
};

/// Workload-type tags. `AdvancedCronJob` and `SidecarSet` parse but have no implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadType {
    CloneSet,
    AdvancedStatefulSet,
    AdvancedDaemonSet,
    UnitedDeployment,
    AdvancedCronJob,
    SidecarSet,
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl WorkloadType {
    pub const ALL: [WorkloadType; 9] = [
        WorkloadType::CloneSet,
        WorkloadType::AdvancedStatefulSet,
        WorkloadType::AdvancedDaemonSet,
        WorkloadType::UnitedDeployment,
        WorkloadType::AdvancedCronJob,
        WorkloadType::SidecarSet,
        WorkloadType::Deployment,
        WorkloadType::StatefulSet,
        WorkloadType::DaemonSet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadType::CloneSet => "CloneSet",
            WorkloadType::AdvancedStatefulSet => "AdvancedStatefulSet",
            WorkloadType::AdvancedDaemonSet => "AdvancedDaemonSet",
            WorkloadType::UnitedDeployment => "UnitedDeployment",
            WorkloadType::AdvancedCronJob => "AdvancedCronJob",
            WorkloadType::SidecarSet => "SidecarSet",
            WorkloadType::Deployment => "Deployment",
            WorkloadType::StatefulSet => "StatefulSet",
            WorkloadType::DaemonSet => "DaemonSet",
        }
    }

    /// Route plural, e.g. `clonesets`.
    pub fn resource(self) -> &'static str {
        match self {
            WorkloadType::CloneSet => "clonesets",
            WorkloadType::AdvancedStatefulSet => "advancedstatefulsets",
            WorkloadType::AdvancedDaemonSet => "advanceddaemonsets",
            WorkloadType::UnitedDeployment => "uniteddeployments",
            WorkloadType::AdvancedCronJob => "advancedcronjobs",
            WorkloadType::SidecarSet => "sidecarsets",
            WorkloadType::Deployment => "deployments",
            WorkloadType::StatefulSet => "statefulsets",
            WorkloadType::DaemonSet => "daemonsets",
        }
    }

    pub fn from_resource(resource: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.resource() == resource)
    }
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Accepts either the tag (`CloneSet`, case-insensitive) or the route plural (`clonesets`).
impl FromStr for WorkloadType {
    type Err = GateError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_resource(s)
            .or_else(|| Self::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(s)))
            .ok_or_else(|| GateError::BadRequest(format!("unsupported workload type: {}", s)))
    }
}

#[async_trait::async_trait]
pub trait WorkloadOperations: Send + Sync {
    fn workload_type(&self) -> WorkloadType;
    /// Returns the replica count written.
    async fn scale(&self, namespace: &str, name: &str, replicas: i32) -> GateResult<i32>;
    async fn validate_restart(&self, namespace: &str, name: &str) -> GateResult<()>;
    /// Validates first; returns the timestamp written into the pod template(s).
    async fn restart(&self, namespace: &str, name: &str) -> GateResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Scale,
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Tag or route plural; parsed by the dispatcher.
    pub workload_type: String,
    pub operation: OperationKind,
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restarted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

impl OperationResult {
    fn failed(message: &str, detail: impl fmt::Display) -> Self {
        counter!("ops_failed_total", 1u64);
        Self { success: false, message: message.to_string(), error: Some(detail.to_string()), ..Default::default() }
    }
}

/// Body of a scale request: `{"replicas": <non-negative integer>}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScaleBody {
    #[serde(default)]
    pub replicas: Option<i64>,
}

impl ScaleBody {
    pub fn parse(body: &serde_json::Value) -> GateResult<i32> {
        let sb: ScaleBody =
            serde_json::from_value(body.clone()).map_err(|e| GateError::BadRequest(format!("invalid scale body: {}", e)))?;
        sb.replicas()
    }

    pub fn replicas(&self) -> GateResult<i32> {
        match self.replicas {
            None => Err(GateError::BadRequest("replicas is required".into())),
            Some(n) if n < 0 => Err(GateError::BadRequest(format!("replicas must be non-negative, got {}", n))),
            Some(n) => i32::try_from(n).map_err(|_| GateError::BadRequest(format!("replicas out of range: {}", n))),
        }
    }
}

/// Tag-to-implementation registry, built once at startup.
pub struct OperationDispatcher {
    registry: HashMap<WorkloadType, Box<dyn WorkloadOperations>>,
}

impl OperationDispatcher {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        let impls: Vec<Box<dyn WorkloadOperations>> = vec![
            Box::new(Workload::<CloneSetAdapter>::new(client.clone())),
            Box::new(Workload::<AdvancedStatefulSetAdapter>::new(client.clone())),
            Box::new(Workload::<AdvancedDaemonSetAdapter>::new(client.clone())),
            Box::new(Workload::<UnitedDeploymentAdapter>::new(client.clone())),
            Box::new(Workload::<DeploymentAdapter>::new(client.clone())),
            Box::new(Workload::<StatefulSetAdapter>::new(client.clone())),
            Box::new(Workload::<DaemonSetAdapter>::new(client)),
        ];
        let registry = impls.into_iter().map(|i| (i.workload_type(), i)).collect();
        Self { registry }
    }

    pub fn operations(&self, t: WorkloadType) -> GateResult<&dyn WorkloadOperations> {
        self.registry
            .get(&t)
            .map(|b| b.as_ref())
            .ok_or_else(|| GateError::Unsupported(format!("operations for workload type {} not supported", t)))
    }

    pub fn supported(&self) -> Vec<WorkloadType> {
        WorkloadType::ALL.into_iter().filter(|t| self.registry.contains_key(t)).collect()
    }

    /// Single entry point. Failures come back as data with `success = false`.
    pub async fn execute(&self, req: &OperationRequest) -> OperationResult {
        let t0 = Instant::now();
        let ops = match req.workload_type.parse::<WorkloadType>().and_then(|t| self.operations(t)) {
            Ok(o) => o,
            Err(e) => {
                warn!(workload = %req.workload_type, error = %e, "ops: no implementation");
                return OperationResult::failed("Operation failed", e);
            }
        };
        let t = ops.workload_type();
        if req.namespace.is_empty() || req.name.is_empty() {
            return OperationResult::failed("Operation failed", "namespace and name are required");
        }
        let (ns, name) = (req.namespace.as_str(), req.name.as_str());
        let result = match req.operation {
            OperationKind::Scale => {
                let Some(replicas) = req.replicas else {
                    return OperationResult::failed("Scale operation failed", "replicas parameter is required for scale operation");
                };
                if let Err(e) = (ScaleBody { replicas: Some(i64::from(replicas)) }).replicas() {
                    return OperationResult::failed("Scale operation failed", e);
                }
                counter!("ops_scale_total", 1u64);
                match ops.scale(ns, name, replicas).await {
                    Ok(n) => OperationResult {
                        success: true,
                        message: format!("{} {}/{} scaled to {} replicas successfully", t, ns, name, n),
                        replicas: Some(n),
                        ..Default::default()
                    },
                    Err(e) => OperationResult::failed("Scale operation failed", e),
                }
            }
            OperationKind::Restart => {
                counter!("ops_restart_total", 1u64);
                match ops.restart(ns, name).await {
                    Ok(ts) => OperationResult {
                        success: true,
                        message: format!("{} {}/{} restarted", t, ns, name),
                        restarted_at: Some(ts),
                        ..Default::default()
                    },
                    Err(e) => OperationResult::failed("Restart operation failed", e),
                }
            }
        };
        info!(workload = %t, op = ?req.operation, ns = %ns, name = %name, success = result.success, took_ms = %t0.elapsed().as_millis(), "ops: execute");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tags_and_plurals() {
        assert_eq!("clonesets".parse::<WorkloadType>().unwrap(), WorkloadType::CloneSet);
        assert_eq!("CloneSet".parse::<WorkloadType>().unwrap(), WorkloadType::CloneSet);
        assert_eq!("advanceddaemonsets".parse::<WorkloadType>().unwrap(), WorkloadType::AdvancedDaemonSet);
        assert_eq!("statefulsets".parse::<WorkloadType>().unwrap(), WorkloadType::StatefulSet);
        assert_eq!("sidecarsets".parse::<WorkloadType>().unwrap(), WorkloadType::SidecarSet);
        assert!("pods".parse::<WorkloadType>().is_err());
    }

    #[test]
    fn scale_body_requires_non_negative_replicas() {
        assert_eq!(ScaleBody::parse(&serde_json::json!({"replicas": 3})).unwrap(), 3);
        assert_eq!(ScaleBody::parse(&serde_json::json!({"replicas": 0})).unwrap(), 0);
        assert_eq!(ScaleBody::parse(&serde_json::json!({})).unwrap_err().status_code(), 400);
        assert_eq!(ScaleBody::parse(&serde_json::json!({"replicas": -1})).unwrap_err().status_code(), 400);
        assert!(ScaleBody::parse(&serde_json::json!({"replicas": "3"})).is_err());
        assert!(ScaleBody::parse(&serde_json::json!({"replicas": 1u64 << 40})).is_err());
    }

    #[test]
    fn result_serializes_without_empty_fields() {
        let r = OperationResult { success: true, message: "ok".into(), ..Default::default() };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v, serde_json::json!({"success": true, "message": "ok"}));
    }
}
