//! kubegate access: scope-aware CRUD over type-erased objects of a resolved kind.
//!
//! Every operation takes a [`ResourceDefinition`] (resolved at request time or built
//! from the static catalog) and routes namespaced vs cluster-scoped requests uniformly.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use kube::api::DeleteParams;
use kube::core::{DynamicObject, TypeMeta};
use kubegate_core::{
    namespace_filter, strip_noise, ErasedList, GateError, GateResult, ListOptions, ResourceDefinition, ALL_NAMESPACES,
};
use kubegate_kubehub::ClusterClient;
use metrics::histogram;
use serde_json::Value as Json;
use tracing::info;

fn max_body_nodes() -> usize {
    std::env::var("KUBEGATE_MAX_BODY_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur > max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => map.values().for_each(|vv| walk(vv, cur, max)),
            Json::Array(arr) => arr.iter().for_each(|vv| walk(vv, cur, max)),
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count > max
}

/// Namespace for a single-object operation. Cluster-scoped kinds ignore whatever was supplied.
pub fn object_namespace<'a>(def: &ResourceDefinition, namespace: Option<&'a str>) -> GateResult<Option<&'a str>> {
    if !def.is_namespaced() {
        return Ok(None);
    }
    match namespace {
        Some(ALL_NAMESPACES) => Err(GateError::BadRequest(format!(
            "{} is namespace-scoped, use the /{}/<namespace>/<name> path",
            def.kind, def.name
        ))),
        None | Some("") => Err(GateError::BadRequest(format!("namespace is required for namespaced kind {}", def.kind))),
        Some(ns) => Ok(Some(ns)),
    }
}

/// Namespace filter for a list. A concrete namespace on a cluster-scoped kind is a scope mismatch.
pub fn list_namespace<'a>(def: &ResourceDefinition, namespace: Option<&'a str>) -> GateResult<Option<&'a str>> {
    match (def.is_namespaced(), namespace_filter(namespace)) {
        (true, ns) => Ok(ns),
        (false, None) => Ok(None),
        (false, Some(ns)) => Err(GateError::BadRequest(format!(
            "{} is cluster-scoped; list it without a namespace (got {})",
            def.kind, ns
        ))),
    }
}

fn object_from_body(def: &ResourceDefinition, body: Json) -> GateResult<DynamicObject> {
    if !body.is_object() {
        return Err(GateError::BadRequest("request body must be a JSON object".into()));
    }
    if node_budget_exceeded(&body, max_body_nodes()) {
        return Err(GateError::BadRequest(format!("request body for {} exceeds the node budget", def.kind)));
    }
    let mut body = body;
    if let Some(map) = body.as_object_mut() {
        // Type meta is always set from the definition.
        map.remove("apiVersion");
        map.remove("kind");
        map.entry("metadata").or_insert_with(|| Json::Object(Default::default()));
    }
    serde_json::from_value(body).map_err(|e| GateError::BadRequest(format!("invalid {} body: {}", def.kind, e)))
}

/// Stateless accessor; holds only the client handle.
#[derive(Clone)]
pub struct DynamicAccessor {
    client: Arc<dyn ClusterClient>,
}

impl DynamicAccessor {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self { Self { client } }

    pub fn client(&self) -> &Arc<dyn ClusterClient> { &self.client }

    pub async fn list(&self, def: &ResourceDefinition, namespace: Option<&str>, opts: &ListOptions) -> GateResult<ErasedList> {
        let t0 = Instant::now();
        let ns = list_namespace(def, namespace)?;
        let ar = def.identity().api_resource();
        let list = self
            .client
            .list(&ar, ns, opts)
            .await
            .map_err(|e| GateError::from_kube(e, format!("list {}", def.plural)))?;
        histogram!("access_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(kind = %def.kind, ns = ?ns, items = list.len(), took_ms = %t0.elapsed().as_millis(), "access: list ok");
        Ok(list)
    }

    pub async fn get(&self, def: &ResourceDefinition, namespace: Option<&str>, name: &str) -> GateResult<DynamicObject> {
        let t0 = Instant::now();
        let ns = object_namespace(def, namespace)?;
        let ar = def.identity().api_resource();
        let mut obj = self
            .client
            .get(&ar, ns, name)
            .await
            .map_err(|e| GateError::from_kube(e, format!("{} {}", def.kind, name)))?;
        strip_noise(&mut obj);
        histogram!("access_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(kind = %def.kind, ns = ?ns, name = %name, took_ms = %t0.elapsed().as_millis(), "access: get ok");
        Ok(obj)
    }

    pub async fn create(&self, def: &ResourceDefinition, namespace: Option<&str>, body: Json) -> GateResult<DynamicObject> {
        let t0 = Instant::now();
        let ns = object_namespace(def, namespace)?;
        let mut obj = object_from_body(def, body)?;
        let id = def.identity();
        obj.types = Some(TypeMeta { api_version: id.api_version(), kind: def.kind.clone() });
        obj.metadata.namespace = ns.map(str::to_string);
        let name = obj.metadata.name.clone().unwrap_or_default();
        let created = self
            .client
            .create(&id.api_resource(), ns, &obj)
            .await
            .map_err(|e| GateError::from_kube(e, format!("create {} {}", def.kind, name)))?;
        histogram!("access_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(kind = %def.kind, ns = ?ns, name = %name, took_ms = %t0.elapsed().as_millis(), "access: create ok");
        Ok(created)
    }

    /// Read-modify-write. Kind, name, resourceVersion, uid and namespace always come from the
    /// live object, so a stale or forged body cannot bypass the store's version check.
    pub async fn update(&self, def: &ResourceDefinition, namespace: Option<&str>, name: &str, body: Json) -> GateResult<DynamicObject> {
        let t0 = Instant::now();
        let ns = object_namespace(def, namespace)?;
        let id = def.identity();
        let ar = id.api_resource();
        let existing = self
            .client
            .get(&ar, ns, name)
            .await
            .map_err(|e| GateError::from_kube(e, format!("{} {}", def.kind, name)))?;
        let mut obj = object_from_body(def, body)?;
        let kind = existing.types.as_ref().map(|t| t.kind.clone()).unwrap_or_else(|| def.kind.clone());
        obj.types = Some(TypeMeta { api_version: id.api_version(), kind });
        obj.metadata.name = existing.metadata.name.clone().or_else(|| Some(name.to_string()));
        obj.metadata.resource_version = existing.metadata.resource_version.clone();
        obj.metadata.uid = existing.metadata.uid.clone();
        obj.metadata.namespace = if def.is_namespaced() { existing.metadata.namespace.clone() } else { None };
        let updated = self
            .client
            .replace(&ar, ns, name, &obj)
            .await
            .map_err(|e| GateError::from_kube(e, format!("update {} {}", def.kind, name)))?;
        histogram!("access_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(kind = %def.kind, ns = ?ns, name = %name, rv = ?updated.metadata.resource_version, took_ms = %t0.elapsed().as_millis(), "access: update ok");
        Ok(updated)
    }

    /// Confirms existence, then deletes with foreground cascade.
    pub async fn delete(&self, def: &ResourceDefinition, namespace: Option<&str>, name: &str) -> GateResult<()> {
        let t0 = Instant::now();
        let ns = object_namespace(def, namespace)?;
        let ar = def.identity().api_resource();
        self.client
            .get(&ar, ns, name)
            .await
            .map_err(|e| GateError::from_kube(e, format!("{} {}", def.kind, name)))?;
        self.client
            .delete(&ar, ns, name, &DeleteParams::foreground())
            .await
            .map_err(|e| GateError::from_kube(e, format!("delete {} {}", def.kind, name)))?;
        histogram!("access_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(kind = %def.kind, ns = ?ns, name = %name, took_ms = %t0.elapsed().as_millis(), "access: delete ok");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubegate_core::Scope;

    fn def(scope: Scope) -> ResourceDefinition {
        ResourceDefinition {
            name: "widgets.example.io".into(),
            group: "example.io".into(),
            served_version: "v1".into(),
            plural: "widgets".into(),
            kind: "Widget".into(),
            list_kind: "WidgetList".into(),
            scope,
        }
    }

    #[test]
    fn object_namespace_rules() {
        let ns = def(Scope::Namespaced);
        assert_eq!(object_namespace(&ns, Some("a")).unwrap(), Some("a"));
        assert_eq!(object_namespace(&ns, Some(ALL_NAMESPACES)).unwrap_err().status_code(), 400);
        assert!(matches!(object_namespace(&ns, Some("")), Err(GateError::BadRequest(_))));
        assert!(matches!(object_namespace(&ns, None), Err(GateError::BadRequest(_))));
        let cl = def(Scope::Cluster);
        assert_eq!(object_namespace(&cl, Some("a")).unwrap(), None);
        assert_eq!(object_namespace(&cl, Some(ALL_NAMESPACES)).unwrap(), None);
    }

    #[test]
    fn list_namespace_rules() {
        let ns = def(Scope::Namespaced);
        assert_eq!(list_namespace(&ns, Some(ALL_NAMESPACES)).unwrap(), None);
        assert_eq!(list_namespace(&ns, Some("")).unwrap(), None);
        assert_eq!(list_namespace(&ns, Some("a")).unwrap(), Some("a"));
        let cl = def(Scope::Cluster);
        assert_eq!(list_namespace(&cl, None).unwrap(), None);
        assert_eq!(list_namespace(&cl, Some(ALL_NAMESPACES)).unwrap(), None);
        assert!(matches!(list_namespace(&cl, Some("a")), Err(GateError::BadRequest(_))));
    }

    #[test]
    fn node_budget_counts_nested_values() {
        let v = serde_json::json!({"a": [1, 2, 3], "b": {"c": 4}});
        assert!(!node_budget_exceeded(&v, 100));
        assert!(!node_budget_exceeded(&v, 7));
        assert!(node_budget_exceeded(&v, 6));
        assert!(node_budget_exceeded(&v, 4));
    }

    #[test]
    fn body_must_be_an_object() {
        assert!(matches!(object_from_body(&def(Scope::Cluster), serde_json::json!([1])), Err(GateError::BadRequest(_))));
        let obj = object_from_body(&def(Scope::Cluster), serde_json::json!({"spec": {"x": 1}})).unwrap();
        assert_eq!(obj.data["spec"]["x"], 1);
    }
}
