//! kubegate schema: resolve a definition name to group/version/kind/scope at request
//! time, plus the catalog of operator kinds known in advance.

#![forbid(unsafe_code)]

use kubegate_core::{GateError, GateResult, ResourceDefinition, ResourceIdentity, Scope};
use kubegate_kubehub::{crd_resource, ClusterClient};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Parse a definition object (as JSON) into a [`ResourceDefinition`].
/// The active version is the first entry of `spec.versions` with `served: true`, in declaration order.
pub fn parse_definition(name: &str, v: &serde_json::Value) -> GateResult<ResourceDefinition> {
    let spec = v.get("spec").ok_or_else(|| GateError::Upstream(format!("definition {} has no spec", name)))?;
    let s = |path: &[&str]| -> String {
        let mut cur = spec;
        for p in path {
            match cur.get(*p) { Some(n) => cur = n, None => return String::new() }
        }
        cur.as_str().unwrap_or_default().to_string()
    };
    let served_version = spec
        .get("versions")
        .and_then(|vv| vv.as_array())
        .and_then(|vs| vs.iter().find(|ver| ver.get("served").and_then(|b| b.as_bool()).unwrap_or(false)))
        .and_then(|ver| ver.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
        .ok_or_else(|| GateError::NotFound(format!("definition {} has no served version", name)))?;
    let kind = s(&["names", "kind"]);
    let list_kind = match s(&["names", "listKind"]) {
        lk if lk.is_empty() => format!("{}List", kind),
        lk => lk,
    };
    Ok(ResourceDefinition {
        name: name.to_string(),
        group: s(&["group"]),
        served_version,
        plural: s(&["names", "plural"]),
        kind,
        list_kind,
        scope: Scope::from_definition(&s(&["scope"])),
    })
}

/// Look up a definition object by name.
/// A missing definition is `NotFound`; every other client error propagates as `Upstream`, unretried.
pub async fn resolve(client: &dyn ClusterClient, definition_name: &str) -> GateResult<ResourceDefinition> {
    let obj = client
        .get(&crd_resource(), None, definition_name)
        .await
        .map_err(|e| GateError::from_kube(e, format!("definition {}", definition_name)))?;
    let v = serde_json::to_value(&obj).map_err(|e| GateError::Upstream(format!("definition {}: {}", definition_name, e)))?;
    let def = parse_definition(definition_name, &v)?;
    debug!(definition = %definition_name, version = %def.served_version, scope = ?def.scope, "schema: resolved");
    Ok(def)
}

/// True when the definition object can be read. Any error (absent, forbidden, timeout) counts as absent.
pub async fn definition_exists(client: &dyn ClusterClient, definition_name: &str) -> bool {
    match client.get(&crd_resource(), None, definition_name).await {
        Ok(_) => true,
        Err(e) => {
            debug!(definition = %definition_name, error = %e, "schema: definition not readable");
            false
        }
    }
}

/// An operator kind whose coordinates are known in advance.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StaticKind {
    /// Route name; also the resource plural.
    pub name: &'static str,
    pub definition_name: &'static str,
    pub kind: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    pub scope: Scope,
}

impl StaticKind {
    pub fn identity(&self) -> ResourceIdentity { ResourceIdentity::new(self.group, self.version, self.name, self.kind) }
}

/// Operator family a static kind belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    Tailscale,
    Traefik,
    SystemUpgrade,
}

const fn sk(family: Family, name: &'static str, definition_name: &'static str, kind: &'static str, group: &'static str, version: &'static str, scope: Scope) -> (Family, StaticKind) {
    (family, StaticKind { name, definition_name, kind, group, version, scope })
}

static CATALOG: [(Family, StaticKind); 13] = [
    sk(Family::Tailscale, "connectors", "connectors.tailscale.com", "Connector", "tailscale.com", "v1alpha1", Scope::Cluster),
    sk(Family::Tailscale, "proxyclasses", "proxyclasses.tailscale.com", "ProxyClass", "tailscale.com", "v1alpha1", Scope::Cluster),
    sk(Family::Tailscale, "proxygroups", "proxygroups.tailscale.com", "ProxyGroup", "tailscale.com", "v1alpha1", Scope::Cluster),
    sk(Family::Traefik, "ingressroutes", "ingressroutes.traefik.io", "IngressRoute", "traefik.io", "v1alpha1", Scope::Namespaced),
    sk(Family::Traefik, "ingressroutetcps", "ingressroutetcps.traefik.io", "IngressRouteTCP", "traefik.io", "v1alpha1", Scope::Namespaced),
    sk(Family::Traefik, "ingressrouteudps", "ingressrouteudps.traefik.io", "IngressRouteUDP", "traefik.io", "v1alpha1", Scope::Namespaced),
    sk(Family::Traefik, "middlewares", "middlewares.traefik.io", "Middleware", "traefik.io", "v1alpha1", Scope::Namespaced),
    sk(Family::Traefik, "middlewaretcps", "middlewaretcps.traefik.io", "MiddlewareTCP", "traefik.io", "v1alpha1", Scope::Namespaced),
    sk(Family::Traefik, "tlsoptions", "tlsoptions.traefik.io", "TLSOption", "traefik.io", "v1alpha1", Scope::Namespaced),
    sk(Family::Traefik, "tlsstores", "tlsstores.traefik.io", "TLSStore", "traefik.io", "v1alpha1", Scope::Namespaced),
    sk(Family::Traefik, "traefikservices", "traefikservices.traefik.io", "TraefikService", "traefik.io", "v1alpha1", Scope::Namespaced),
    sk(Family::Traefik, "serverstransports", "serverstransports.traefik.io", "ServersTransport", "traefik.io", "v1alpha1", Scope::Namespaced),
    sk(Family::SystemUpgrade, "plans", "plans.upgrade.cattle.io", "Plan", "upgrade.cattle.io", "v1", Scope::Namespaced),
];

pub fn static_kinds() -> impl Iterator<Item = &'static StaticKind> { CATALOG.iter().map(|(_, k)| k) }

pub fn static_kinds_of(family: Family) -> impl Iterator<Item = &'static StaticKind> {
    CATALOG.iter().filter(move |(f, _)| *f == family).map(|(_, k)| k)
}

pub fn find_static_kind(name: &str) -> Option<&'static StaticKind> { static_kinds().find(|k| k.name == name) }

/// Confirm a static kind's definition is installed and build its definition.
/// Coordinates come from the catalog; kind and list kind from the installed definition.
pub async fn resolve_static(client: &dyn ClusterClient, sk: &StaticKind) -> GateResult<ResourceDefinition> {
    let installed = resolve(client, sk.definition_name).await.map_err(|e| match e {
        GateError::NotFound(_) => GateError::NotFound(format!("{} is not installed ({} missing)", sk.kind, sk.definition_name)),
        other => other,
    })?;
    info!(kind = %sk.name, definition = %sk.definition_name, "schema: static kind installed");
    Ok(ResourceDefinition {
        name: sk.definition_name.to_string(),
        group: sk.group.to_string(),
        served_version: sk.version.to_string(),
        plural: sk.name.to_string(),
        kind: if installed.kind.is_empty() { sk.kind.to_string() } else { installed.kind },
        list_kind: installed.list_kind,
        scope: sk.scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubegate_kubehub::mock::{crd_object, MockCluster, Verb};

    #[test]
    fn picks_first_served_version_in_declaration_order() {
        let a = crd_object("example.io", "widgets", "Widget", "Namespaced", &[("v2", true), ("v1", true)]);
        let b = crd_object("example.io", "widgets", "Widget", "Namespaced", &[("v1", true), ("v2", true)]);
        let pa = parse_definition("widgets.example.io", &serde_json::to_value(&a).unwrap()).unwrap();
        let pb = parse_definition("widgets.example.io", &serde_json::to_value(&b).unwrap()).unwrap();
        assert_eq!(pa.served_version, "v2");
        assert_eq!(pb.served_version, "v1");
    }

    #[test]
    fn skips_unserved_versions_and_reads_names() {
        let c = crd_object("example.io", "gadgets", "Gadget", "Cluster", &[("v1alpha1", false), ("v1beta1", true)]);
        let def = parse_definition("gadgets.example.io", &serde_json::to_value(&c).unwrap()).unwrap();
        assert_eq!(def.served_version, "v1beta1");
        assert_eq!(def.plural, "gadgets");
        assert_eq!(def.kind, "Gadget");
        assert_eq!(def.list_kind, "GadgetList");
        assert_eq!(def.scope, Scope::Cluster);
        assert_eq!(def.identity().api_version(), "example.io/v1beta1");
    }

    #[test]
    fn no_served_version_is_not_found() {
        let c = crd_object("example.io", "gadgets", "Gadget", "Cluster", &[("v1", false)]);
        let err = parse_definition("gadgets.example.io", &serde_json::to_value(&c).unwrap()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn resolve_maps_missing_to_not_found_and_other_errors_to_upstream() {
        let m = MockCluster::new();
        assert!(resolve(&m, "nope.example.io").await.unwrap_err().is_not_found());
        m.fail(Verb::Get, "customresourcedefinitions", 403);
        let err = resolve(&m, "nope.example.io").await.unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(!definition_exists(&m, "nope.example.io").await);
    }

    #[tokio::test]
    async fn resolve_static_requires_installed_definition() {
        let m = MockCluster::new();
        let mw = find_static_kind("middlewares").unwrap();
        assert!(resolve_static(&m, mw).await.unwrap_err().is_not_found());
        m.insert_crd(crd_object("traefik.io", "middlewares", "Middleware", "Namespaced", &[("v1alpha1", true)]));
        let def = resolve_static(&m, mw).await.unwrap();
        assert_eq!(def.identity(), mw.identity());
        assert_eq!(def.list_kind, "MiddlewareList");
    }

    #[test]
    fn catalog_families_are_complete() {
        assert_eq!(static_kinds_of(Family::Tailscale).count(), 3);
        assert_eq!(static_kinds_of(Family::Traefik).count(), 9);
        assert_eq!(static_kinds_of(Family::SystemUpgrade).count(), 1);
        assert!(static_kinds_of(Family::Tailscale).all(|k| k.scope == Scope::Cluster));
        for k in static_kinds() {
            assert!(k.definition_name.starts_with(k.name));
            assert!(k.definition_name.ends_with(k.group));
        }
    }
}
