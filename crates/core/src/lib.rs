//! kubegate core types: resource coordinates, resolved definitions, type-erased
//! documents and the error taxonomy shared by every crate.

#![forbid(unsafe_code)]

use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};

/// Reserved namespace path segment meaning "every namespace".
pub const ALL_NAMESPACES: &str = "_all";

/// Annotation written by `kubectl apply`; stripped from read responses.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Whether instances of a kind are partitioned by namespace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Scope {
    Namespaced,
    Cluster,
}

impl Scope {
    /// Parse the `spec.scope` string of a resource definition.
    pub fn from_definition(s: &str) -> Self {
        if s == "Cluster" { Scope::Cluster } else { Scope::Namespaced }
    }

    pub fn is_namespaced(self) -> bool { matches!(self, Scope::Namespaced) }
}

/// Coordinates used to address a type-erased object or list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    pub group: String,
    pub version: String,
    pub plural: String,
    pub kind: String,
}

impl ResourceIdentity {
    pub fn new(group: &str, version: &str, plural: &str, kind: &str) -> Self {
        Self { group: group.to_string(), version: version.to_string(), plural: plural.to_string(), kind: kind.to_string() }
    }

    /// `group/version`, or bare `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    /// `group/version/Kind` key (or `version/Kind` for core), as used in logs and cache keys.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }

    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }
}

/// Split an `apiVersion` string into `(group, version)`.
pub fn split_api_version(api_version: &str) -> Option<(&str, &str)> {
    match api_version.split('/').collect::<Vec<_>>().as_slice() {
        [version] if !version.is_empty() => Some(("", version)),
        [group, version] if !group.is_empty() && !version.is_empty() => Some((group, version)),
        _ => None,
    }
}

/// Schema-and-scope declaration of a custom kind, read from its definition object.
/// Immutable once read; never cached beyond a request (the availability cache only keeps existence).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDefinition {
    /// Definition object name, e.g. `clonesets.apps.kruise.io`.
    pub name: String,
    pub group: String,
    pub served_version: String,
    pub plural: String,
    pub kind: String,
    pub list_kind: String,
    pub scope: Scope,
}

impl ResourceDefinition {
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(&self.group, &self.served_version, &self.plural, &self.kind)
    }

    pub fn is_namespaced(&self) -> bool { self.scope.is_namespaced() }
}

/// Schema-less object. kube's `DynamicObject` already carries its own type meta.
pub type ErasedObject = DynamicObject;

/// Schema-less list tagged with the identity it was listed under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErasedList {
    pub identity: ResourceIdentity,
    pub items: Vec<DynamicObject>,
    /// Pagination token for the next page, if the server truncated the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ErasedList {
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

/// Optional list refinements passed through to the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListOptions {
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListOptions {
    pub fn to_list_params(&self) -> kube::api::ListParams {
        let mut lp = kube::api::ListParams::default();
        if let Some(l) = self.limit { lp = lp.limit(l); }
        if let Some(c) = self.continue_token.as_deref() { lp = lp.continue_token(c); }
        if let Some(s) = self.label_selector.as_deref() { lp = lp.labels(s); }
        if let Some(s) = self.field_selector.as_deref() { lp = lp.fields(s); }
        lp
    }
}

/// Map a namespace path segment to a list filter: empty and `_all` mean unfiltered.
pub fn namespace_filter(namespace: Option<&str>) -> Option<&str> {
    match namespace {
        None | Some("") | Some(ALL_NAMESPACES) => None,
        Some(ns) => Some(ns),
    }
}

/// Remove fields that are noise for API consumers (managed fields, last-applied annotation).
#[cfg(feature = "strip-managed-fields")]
pub fn strip_noise(obj: &mut DynamicObject) {
    obj.metadata.managed_fields = None;
    if let Some(annotations) = obj.metadata.annotations.as_mut() {
        annotations.remove(LAST_APPLIED_ANNOTATION);
    }
}

#[cfg(not(feature = "strip-managed-fields"))]
pub fn strip_noise(_obj: &mut DynamicObject) {}

/// Error taxonomy surfaced to callers. `Upstream` carries only the rendered cause.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum GateError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("bad_request: {0}")]
    BadRequest(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("upstream: {0}")]
    Upstream(String),
}

pub type GateResult<T> = Result<T, GateError>;

impl GateError {
    /// HTTP status equivalent of the error class.
    pub fn status_code(&self) -> u16 {
        match self {
            GateError::NotFound(_) => 404,
            GateError::BadRequest(_) | GateError::Unsupported(_) => 400,
            GateError::Upstream(_) => 500,
        }
    }

    /// Human message without the class prefix.
    pub fn message(&self) -> &str {
        match self {
            GateError::NotFound(m) | GateError::BadRequest(m) | GateError::Unsupported(m) | GateError::Upstream(m) => m,
        }
    }

    /// Classify a client error; `what` names the object for the message.
    pub fn from_kube(err: kube::Error, what: impl std::fmt::Display) -> Self {
        if is_not_found(&err) {
            GateError::NotFound(format!("{} not found", what))
        } else {
            GateError::Upstream(format!("{}: {}", what, err))
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, GateError::NotFound(_)) }
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

pub mod prelude {
    pub use super::{
        namespace_filter, ErasedList, ErasedObject, GateError, GateResult, ListOptions, ResourceDefinition,
        ResourceIdentity, Scope, ALL_NAMESPACES,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_and_gvk_key_for_core_and_grouped() {
        let core = ResourceIdentity::new("", "v1", "configmaps", "ConfigMap");
        assert_eq!(core.api_version(), "v1");
        assert_eq!(core.gvk_key(), "v1/ConfigMap");
        let grouped = ResourceIdentity::new("apps.kruise.io", "v1alpha1", "clonesets", "CloneSet");
        assert_eq!(grouped.api_version(), "apps.kruise.io/v1alpha1");
        assert_eq!(grouped.gvk_key(), "apps.kruise.io/v1alpha1/CloneSet");
        let ar = grouped.api_resource();
        assert_eq!(ar.plural, "clonesets");
        assert_eq!(ar.api_version, "apps.kruise.io/v1alpha1");
    }

    #[test]
    fn split_api_version_handles_core_and_invalid() {
        assert_eq!(split_api_version("batch/v1"), Some(("batch", "v1")));
        assert_eq!(split_api_version("v1"), Some(("", "v1")));
        assert_eq!(split_api_version("a/b/c"), None);
        assert_eq!(split_api_version(""), None);
    }

    #[test]
    fn namespace_filter_treats_sentinel_as_unfiltered() {
        assert_eq!(namespace_filter(None), None);
        assert_eq!(namespace_filter(Some("")), None);
        assert_eq!(namespace_filter(Some(ALL_NAMESPACES)), None);
        assert_eq!(namespace_filter(Some("team-a")), Some("team-a"));
    }

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(GateError::NotFound("x".into()).status_code(), 404);
        assert_eq!(GateError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(GateError::Unsupported("x".into()).status_code(), 400);
        assert_eq!(GateError::Upstream("x".into()).status_code(), 500);
    }

    #[test]
    fn list_options_map_onto_list_params() {
        let opts = ListOptions { limit: Some(50), continue_token: Some("tok".into()), label_selector: Some("app=web".into()), field_selector: None };
        let lp = opts.to_list_params();
        assert_eq!(lp.limit, Some(50));
        assert_eq!(lp.continue_token.as_deref(), Some("tok"));
        assert_eq!(lp.label_selector.as_deref(), Some("app=web"));
        assert_eq!(lp.field_selector, None);
    }

    #[test]
    fn strip_noise_drops_managed_fields_and_last_applied() {
        let mut obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {
                "name": "cm",
                "managedFields": [{"manager": "kubectl"}],
                "annotations": {"kubectl.kubernetes.io/last-applied-configuration": "{}", "keep": "yes"}
            }
        }))
        .unwrap();
        strip_noise(&mut obj);
        assert!(obj.metadata.managed_fields.is_none());
        let ann = obj.metadata.annotations.unwrap();
        assert!(!ann.contains_key(LAST_APPLIED_ANNOTATION));
        assert_eq!(ann.get("keep").map(String::as_str), Some("yes"));
    }

    #[test]
    fn scope_parses_definition_strings() {
        assert_eq!(Scope::from_definition("Cluster"), Scope::Cluster);
        assert_eq!(Scope::from_definition("Namespaced"), Scope::Namespaced);
    }
}
