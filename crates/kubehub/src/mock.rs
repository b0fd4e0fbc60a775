//! In-memory cluster used by tests across the workspace.
//!
//! Objects are keyed by `(group/plural, namespace, name)`. Replace enforces
//! resourceVersion and uid preconditions the way an API server does, and every
//! call is recorded so tests can assert on exactly what reached the cluster.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::DeleteParams,
    core::{ApiResource, DynamicObject},
};
use kubegate_core::{ErasedList, ListOptions};

use crate::{api_error, crd_resource, identity_of, ClusterClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Replace,
    Delete,
}

/// One recorded client call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub plural: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    /// Debug rendering of the delete propagation policy, if any.
    pub propagation: Option<String>,
}

type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    failures: HashMap<(Verb, String), u16>,
    calls: Vec<Call>,
    next_rv: u64,
}

#[derive(Default)]
pub struct MockCluster {
    state: Mutex<State>,
}

fn res_key(ar: &ApiResource) -> String { format!("{}/{}", ar.group, ar.plural) }

fn matches_labels(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector.split(',').map(str::trim).filter(|s| !s.is_empty()).all(|term| match term.split_once('=') {
        Some((k, v)) => labels.get(k.trim_end_matches('=')).map(String::as_str) == Some(v),
        None => labels.contains_key(term),
    })
}

impl MockCluster {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object without recording a call. Namespace comes from the object metadata.
    pub fn insert(&self, ar: &ApiResource, mut obj: DynamicObject) {
        let mut st = self.lock();
        st.next_rv += 1;
        let rv = st.next_rv.to_string();
        if obj.metadata.resource_version.is_none() { obj.metadata.resource_version = Some(rv); }
        if obj.metadata.uid.is_none() { obj.metadata.uid = Some(uuid::Uuid::new_v4().to_string()); }
        if obj.types.is_none() {
            obj.types = Some(kube::core::TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
        }
        let key = (res_key(ar), obj.metadata.namespace.clone().unwrap_or_default(), obj.metadata.name.clone().unwrap_or_default());
        st.objects.insert(key, obj);
    }

    /// Seed a definition object (`customresourcedefinitions`).
    pub fn insert_crd(&self, crd: DynamicObject) { self.insert(&crd_resource(), crd) }

    /// Make every later `verb` on `plural` fail with `code`.
    pub fn fail(&self, verb: Verb, plural: &str, code: u16) {
        self.lock().failures.insert((verb, plural.to_string()), code);
    }

    pub fn clear_failures(&self) { self.lock().failures.clear(); }

    pub fn object(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        let key = (res_key(ar), namespace.unwrap_or_default().to_string(), name.to_string());
        self.lock().objects.get(&key).cloned()
    }

    pub fn calls(&self) -> Vec<Call> { self.lock().calls.clone() }

    pub fn count(&self, verb: Verb, plural: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.verb == verb && c.plural == plural).count()
    }

    pub fn total_calls(&self) -> usize { self.lock().calls.len() }

    pub fn reset_calls(&self) { self.lock().calls.clear(); }

    fn record(&self, verb: Verb, ar: &ApiResource, namespace: Option<&str>, name: Option<&str>, propagation: Option<String>) -> Result<(), kube::Error> {
        let mut st = self.lock();
        st.calls.push(Call {
            verb,
            plural: ar.plural.clone(),
            namespace: namespace.map(str::to_string),
            name: name.map(str::to_string),
            propagation,
        });
        match st.failures.get(&(verb, ar.plural.clone())) {
            Some(code) => Err(api_error(*code, "Injected", format!("injected failure for {:?} {}", verb, ar.plural))),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockCluster {
    async fn get(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<DynamicObject, kube::Error> {
        self.record(Verb::Get, ar, namespace, Some(name), None)?;
        self.object(ar, namespace, name)
            .ok_or_else(|| api_error(404, "NotFound", format!("{} \"{}\" not found", ar.plural, name)))
    }

    async fn list(&self, ar: &ApiResource, namespace: Option<&str>, opts: &ListOptions) -> Result<ErasedList, kube::Error> {
        self.record(Verb::List, ar, namespace, None, None)?;
        let rk = res_key(ar);
        let st = self.lock();
        let mut items: Vec<DynamicObject> = st
            .objects
            .iter()
            .filter(|((r, ns, _), _)| *r == rk && namespace.map_or(true, |want| ns == want))
            .map(|(_, o)| o.clone())
            .filter(|o| opts.label_selector.as_deref().map_or(true, |s| matches_labels(o, s)))
            .collect();
        let offset: usize = opts.continue_token.as_deref().and_then(|t| t.parse().ok()).unwrap_or(0);
        items = items.into_iter().skip(offset).collect();
        let mut continue_token = None;
        if let Some(limit) = opts.limit.map(|l| l as usize) {
            if items.len() > limit {
                items.truncate(limit);
                continue_token = Some((offset + limit).to_string());
            }
        }
        Ok(ErasedList { identity: identity_of(ar), items, continue_token, resource_version: Some(st.next_rv.to_string()) })
    }

    async fn create(&self, ar: &ApiResource, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.record(Verb::Create, ar, namespace, Some(&name), None)?;
        if name.is_empty() {
            return Err(api_error(422, "Invalid", "metadata.name: Required value"));
        }
        let key = (res_key(ar), namespace.unwrap_or_default().to_string(), name.clone());
        let mut st = self.lock();
        if st.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{} \"{}\" already exists", ar.plural, name)));
        }
        st.next_rv += 1;
        let mut stored = obj.clone();
        stored.metadata.namespace = namespace.map(str::to_string);
        stored.metadata.resource_version = Some(st.next_rv.to_string());
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        st.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, ar: &ApiResource, namespace: Option<&str>, name: &str, obj: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        self.record(Verb::Replace, ar, namespace, Some(name), None)?;
        let key = (res_key(ar), namespace.unwrap_or_default().to_string(), name.to_string());
        let mut st = self.lock();
        let current = st
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound", format!("{} \"{}\" not found", ar.plural, name)))?;
        if obj.metadata.name.as_deref() != Some(name) {
            return Err(api_error(400, "BadRequest", "the name of the object does not match the name on the URL"));
        }
        if let Some(rv) = obj.metadata.resource_version.as_deref() {
            if Some(rv) != current.metadata.resource_version.as_deref() {
                return Err(api_error(409, "Conflict", "the object has been modified; please apply your changes to the latest version"));
            }
        }
        if let Some(uid) = obj.metadata.uid.as_deref() {
            if Some(uid) != current.metadata.uid.as_deref() {
                return Err(api_error(409, "Conflict", "Precondition failed: UID in precondition does not match UID in object"));
            }
        }
        st.next_rv += 1;
        let mut stored = obj.clone();
        stored.metadata.namespace = namespace.map(str::to_string);
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.resource_version = Some(st.next_rv.to_string());
        st.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str, dp: &DeleteParams) -> Result<(), kube::Error> {
        let propagation = dp.propagation_policy.as_ref().map(|p| format!("{:?}", p));
        self.record(Verb::Delete, ar, namespace, Some(name), propagation)?;
        let key = (res_key(ar), namespace.unwrap_or_default().to_string(), name.to_string());
        match self.lock().objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound", format!("{} \"{}\" not found", ar.plural, name))),
        }
    }
}

/// Build a definition object. `versions` lists `(name, served)` in declaration order.
pub fn crd_object(group: &str, plural: &str, kind: &str, scope: &str, versions: &[(&str, bool)]) -> DynamicObject {
    let versions: Vec<serde_json::Value> = versions
        .iter()
        .map(|(v, served)| serde_json::json!({"name": v, "served": served, "storage": false, "schema": {"openAPIV3Schema": {"type": "object"}}}))
        .collect();
    let value = serde_json::json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {"name": format!("{}.{}", plural, group)},
        "spec": {
            "group": group,
            "names": {"plural": plural, "kind": kind, "listKind": format!("{}List", kind), "singular": kind.to_lowercase()},
            "scope": scope,
            "versions": versions,
        }
    });
    // The literal above always matches DynamicObject's shape.
    serde_json::from_value(value).unwrap_or_else(|_| DynamicObject::new(&format!("{}.{}", plural, group), &crd_resource()))
}

/// Build a bare object of the given resource with an arbitrary body merged at the top level.
pub fn object(ar: &ApiResource, namespace: Option<&str>, name: &str, body: serde_json::Value) -> DynamicObject {
    let mut obj = DynamicObject::new(name, ar).data(body);
    if let Some(ns) = namespace { obj = obj.within(ns); }
    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::PropagationPolicy;
    use kubegate_core::ResourceIdentity;

    fn cm() -> ApiResource { ResourceIdentity::new("", "v1", "configmaps", "ConfigMap").api_resource() }

    #[tokio::test]
    async fn create_assigns_uid_and_rejects_duplicates() {
        let m = MockCluster::new();
        let obj = object(&cm(), Some("a"), "one", serde_json::json!({"data": {"k": "v"}}));
        let created = m.create(&cm(), Some("a"), &obj).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        let dup = m.create(&cm(), Some("a"), &obj).await.unwrap_err();
        assert!(matches!(dup, kube::Error::Api(ae) if ae.code == 409));
    }

    #[tokio::test]
    async fn replace_enforces_resource_version() {
        let m = MockCluster::new();
        m.insert(&cm(), object(&cm(), Some("a"), "one", serde_json::json!({})));
        let live = m.get(&cm(), Some("a"), "one").await.unwrap();
        let mut stale = live.clone();
        stale.metadata.resource_version = Some("999".into());
        assert!(m.replace(&cm(), Some("a"), "one", &stale).await.is_err());
        let updated = m.replace(&cm(), Some("a"), "one", &live).await.unwrap();
        assert_ne!(updated.metadata.resource_version, live.metadata.resource_version);
        assert_eq!(updated.metadata.uid, live.metadata.uid);
    }

    #[tokio::test]
    async fn list_filters_namespace_and_paginates() {
        let m = MockCluster::new();
        for (ns, n) in [("a", "x"), ("a", "y"), ("b", "z")] {
            m.insert(&cm(), object(&cm(), Some(ns), n, serde_json::json!({})));
        }
        assert_eq!(m.list(&cm(), Some("a"), &ListOptions::default()).await.unwrap().len(), 2);
        let first = m.list(&cm(), None, &ListOptions { limit: Some(2), ..Default::default() }).await.unwrap();
        assert_eq!(first.len(), 2);
        let token = first.continue_token.clone().unwrap();
        let rest = m.list(&cm(), None, &ListOptions { continue_token: Some(token), ..Default::default() }).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest.continue_token.is_none());
    }

    #[tokio::test]
    async fn records_calls_failures_and_propagation() {
        let m = MockCluster::new();
        m.insert(&cm(), object(&cm(), Some("a"), "one", serde_json::json!({})));
        m.fail(Verb::List, "configmaps", 503);
        assert!(m.list(&cm(), None, &ListOptions::default()).await.is_err());
        m.delete(&cm(), Some("a"), "one", &DeleteParams::foreground()).await.unwrap();
        let calls = m.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].verb, Verb::Delete);
        assert_eq!(calls[1].propagation, Some(format!("{:?}", PropagationPolicy::Foreground)));
        assert!(m.object(&cm(), Some("a"), "one").is_none());
    }

    #[test]
    fn crd_object_parses_into_typed_definition() {
        let crd = crd_object("apps.kruise.io", "clonesets", "CloneSet", "Namespaced", &[("v1alpha1", true)]);
        let typed: CustomResourceDefinition = serde_json::from_value(serde_json::to_value(&crd).unwrap()).unwrap();
        assert_eq!(typed.spec.names.plural, "clonesets");
        assert_eq!(crd.metadata.name.as_deref(), Some("clonesets.apps.kruise.io"));
    }
}
