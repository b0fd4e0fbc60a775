use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::core::ApiResource;
use kubegate_api::{Config, GateApi, InProcApi, WorkloadFamily};
use kubegate_core::{GateError, ListOptions, ResourceIdentity};
use kubegate_kubehub::mock::{crd_object, object, MockCluster, Verb};
use serde_json::json;

fn setup() -> (Arc<MockCluster>, InProcApi) {
    let mock = Arc::new(MockCluster::new());
    (mock.clone(), InProcApi::new(mock, Config::default()))
}

fn cloneset_ar() -> ApiResource { ResourceIdentity::new("apps.kruise.io", "v1alpha1", "clonesets", "CloneSet").api_resource() }

fn controller(mock: &MockCluster, ns: &str, name: &str, container: &str, image: &str) {
    let ar = ApiResource::erase::<Deployment>(&());
    mock.insert(&ar, object(&ar, Some(ns), name, json!({"spec": {
        "selector": {"matchLabels": {"app": name}},
        "template": {"metadata": {"labels": {"app": name}}, "spec": {"containers": [
            {"name": "kube-rbac-proxy", "image": "gcr.io/kubebuilder/kube-rbac-proxy:v0.8.0"},
            {"name": container, "image": image}
        ]}}
    }})));
}

#[tokio::test]
async fn cr_routes_resolve_the_definition_per_request() {
    let (mock, api) = setup();
    let err = api.cr_get("clonesets.apps.kruise.io", Some("default"), "web").await.unwrap_err();
    assert!(matches!(err, GateError::NotFound(_)));

    mock.insert_crd(crd_object("apps.kruise.io", "clonesets", "CloneSet", "Namespaced", &[("v1alpha1", true)]));
    let ar = cloneset_ar();
    let mut seeded = object(&ar, Some("default"), "web", json!({"spec": {"replicas": 1}}));
    seeded.metadata.managed_fields = Some(vec![Default::default()]);
    mock.insert(&ar, seeded);
    let got = api.cr_get("clonesets.apps.kruise.io", Some("default"), "web").await.unwrap();
    assert!(got.metadata.managed_fields.is_none());
    let list = api.cr_list("clonesets.apps.kruise.io", Some("_all"), &ListOptions::default()).await.unwrap();
    assert_eq!(list.len(), 1);
}

#[tokio::test]
async fn static_kinds_require_an_installed_definition() {
    let (mock, api) = setup();
    let err = api.kind_list("connectors", None, &ListOptions::default()).await.unwrap_err();
    assert!(matches!(err, GateError::NotFound(_)));
    assert!(matches!(api.kind_get("gizmos", None, "x").await.unwrap_err(), GateError::NotFound(_)));

    mock.insert_crd(crd_object("tailscale.com", "connectors", "Connector", "Cluster", &[("v1alpha1", true)]));
    let created = api.kind_create("connectors", Some("ignored"), json!({"metadata": {"name": "exit"}, "spec": {"exitNode": true}})).await.unwrap();
    assert!(created.metadata.namespace.is_none());
    assert_eq!(created.types.unwrap().kind, "Connector");
    assert_eq!(api.kind_list("connectors", None, &ListOptions::default()).await.unwrap().len(), 1);
    api.kind_delete("connectors", None, "exit").await.unwrap();
    assert_eq!(mock.count(Verb::Delete, "connectors"), 1);
}

#[tokio::test]
async fn openkruise_status_reports_counts_and_controller_version() {
    let (mock, api) = setup();
    mock.insert_crd(crd_object("apps.kruise.io", "clonesets", "CloneSet", "Namespaced", &[("v1alpha1", true)]));
    let ar = cloneset_ar();
    for (ns, n) in [("a", "one"), ("b", "two")] {
        mock.insert(&ar, object(&ar, Some(ns), n, json!({"spec": {"replicas": 1}})));
    }
    controller(&mock, "kruise-system", "kruise-controller-manager", "manager", "openkruise/kruise-manager:v1.5.0");

    let status = api.family_status(WorkloadFamily::OpenKruise).await.unwrap();
    assert!(status.installed);
    assert_eq!(status.version.as_deref(), Some("v1.5.0"));
    assert_eq!(status.workloads.len(), 15);
    let cs = &status.workloads[0];
    assert_eq!((cs.name.as_str(), cs.available, cs.count), ("clonesets", true, 2));
    assert!(status.workloads[1..].iter().all(|w| !w.available && w.count == 0));

    let lists = mock.count(Verb::List, "clonesets");
    api.family_status(WorkloadFamily::OpenKruise).await.unwrap();
    assert_eq!(mock.count(Verb::List, "clonesets"), lists);
    api.clear_cache().await;
    api.family_status(WorkloadFamily::OpenKruise).await.unwrap();
    assert_eq!(mock.count(Verb::List, "clonesets"), lists + 1);
}

#[tokio::test]
async fn version_sources_are_tried_in_order() {
    let (mock, api) = setup();
    mock.insert_crd(crd_object("traefik.io", "middlewares", "Middleware", "Namespaced", &[("v1alpha1", true)]));
    controller(&mock, "kube-system", "traefik", "traefik", "rancher/mirrored-library-traefik:2.10.5");
    let status = api.family_status(WorkloadFamily::Traefik).await.unwrap();
    assert!(status.installed);
    assert_eq!(status.version.as_deref(), Some("2.10.5"));
    let tried: Vec<_> = mock
        .calls()
        .into_iter()
        .filter(|c| c.verb == Verb::Get && c.plural == "deployments")
        .filter_map(|c| c.namespace)
        .collect();
    assert_eq!(tried, ["traefik-system", "traefik-v2", "traefik", "kube-system"]);
}

#[tokio::test]
async fn builtin_jobs_alone_do_not_mean_system_upgrade_is_installed() {
    let (mock, api) = setup();
    let jobs = ResourceIdentity::new("batch", "v1", "jobs", "Job").api_resource();
    mock.insert(&jobs, object(&jobs, Some("system-upgrade"), "apply-k3s", json!({})));
    let status = api.family_status(WorkloadFamily::SystemUpgrade).await.unwrap();
    assert!(!status.installed);
    assert!(status.version.is_none());
    assert_eq!(status.workloads[1].count, 1);
    assert_eq!(mock.count(Verb::Get, "deployments"), 0);
}

#[tokio::test]
async fn scale_body_is_validated_before_dispatch() {
    let (mock, api) = setup();
    for body in [json!({}), json!({"replicas": -2})] {
        let err = api.scale("clonesets", "default", "web", &body).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
    assert_eq!(mock.total_calls(), 0);

    let ar = cloneset_ar();
    mock.insert(&ar, object(&ar, Some("default"), "web", json!({"spec": {"replicas": 1}})));
    let r = api.scale("clonesets", "default", "web", &json!({"replicas": 5})).await.unwrap();
    assert!(r.success, "{:?}", r);
    assert_eq!(r.replicas, Some(5));
    let r = api.restart("sidecarsets", "default", "web").await;
    assert!(!r.success);
}

#[tokio::test]
async fn floating_tag_falls_through_to_the_next_version_source() {
    let (mock, api) = setup();
    mock.insert_crd(crd_object("tailscale.com", "connectors", "Connector", "Cluster", &[("v1alpha1", true)]));
    controller(&mock, "tailscale", "operator", "operator", "tailscale/k8s-operator:stable");
    controller(&mock, "kube-system", "tailscale-operator", "tailscale-operator", "tailscale/k8s-operator:v1.62.0");
    let status = api.family_status(WorkloadFamily::Tailscale).await.unwrap();
    assert!(status.installed);
    assert_eq!(status.version.as_deref(), Some("v1.62.0"));
}

#[tokio::test]
async fn failed_lists_follow_each_family_policy() {
    let (mock, api) = setup();
    mock.insert_crd(crd_object("upgrade.cattle.io", "plans", "Plan", "Namespaced", &[("v1", true)]));
    mock.insert_crd(crd_object("traefik.io", "middlewares", "Middleware", "Namespaced", &[("v1alpha1", true)]));
    mock.fail(Verb::List, "plans", 500);
    mock.fail(Verb::List, "middlewares", 500);

    let upgrade = api.family_status(WorkloadFamily::SystemUpgrade).await.unwrap();
    let plans = &upgrade.workloads[0];
    assert_eq!((plans.name.as_str(), plans.available, plans.count), ("plans", false, 0));
    assert!(!upgrade.installed);

    let traefik = api.family_status(WorkloadFamily::Traefik).await.unwrap();
    let mw = traefik.workloads.iter().find(|w| w.name == "middlewares").unwrap();
    assert_eq!((mw.available, mw.count), (true, 0));
    assert!(traefik.installed);
}
