//! Status probes per operator family: which kinds are installed, how many objects
//! exist, and which controller version is running.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::apps::v1::Deployment;
use kube::core::ApiResource;
use kubegate_core::{GateError, ResourceIdentity};
use kubegate_kubehub::ClusterClient;
use kubegate_schema::{static_kinds_of, Family};
use kubegate_store::{Availability, ListFailure, Lookup};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadFamily {
    OpenKruise,
    Tailscale,
    Traefik,
    SystemUpgrade,
}

impl WorkloadFamily {
    pub const ALL: [WorkloadFamily; 4] =
        [WorkloadFamily::OpenKruise, WorkloadFamily::Tailscale, WorkloadFamily::Traefik, WorkloadFamily::SystemUpgrade];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadFamily::OpenKruise => "openkruise",
            WorkloadFamily::Tailscale => "tailscale",
            WorkloadFamily::Traefik => "traefik",
            WorkloadFamily::SystemUpgrade => "system-upgrade",
        }
    }

    /// Cache-key prefix; OpenKruise keys are unprefixed.
    pub fn prefix(self) -> &'static str {
        match self {
            WorkloadFamily::OpenKruise => "",
            WorkloadFamily::Tailscale => "tailscale:",
            WorkloadFamily::Traefik => "traefik:",
            WorkloadFamily::SystemUpgrade => "system-upgrade:",
        }
    }

    pub fn on_list_failure(self) -> ListFailure {
        match self {
            WorkloadFamily::SystemUpgrade => ListFailure::Unavailable,
            _ => ListFailure::AvailableWithZero,
        }
    }

    pub fn probes(self) -> Vec<Probe> {
        match self {
            WorkloadFamily::OpenKruise => KRUISE.to_vec(),
            WorkloadFamily::Tailscale => catalog_probes(Family::Tailscale),
            WorkloadFamily::Traefik => catalog_probes(Family::Traefik),
            WorkloadFamily::SystemUpgrade => {
                let mut v = catalog_probes(Family::SystemUpgrade);
                v.push(Probe {
                    name: "jobs",
                    kind: "Job",
                    group: "batch",
                    version: "v1",
                    plural: "jobs",
                    definition: None,
                    description: "Job executes upgrade operations on target nodes",
                });
                v
            }
        }
    }

    pub fn version_sources(self) -> &'static [VersionSource] {
        match self {
            WorkloadFamily::OpenKruise => KRUISE_VERSION,
            WorkloadFamily::Tailscale => TAILSCALE_VERSION,
            WorkloadFamily::Traefik => TRAEFIK_VERSION,
            WorkloadFamily::SystemUpgrade => UPGRADE_VERSION,
        }
    }

    pub fn lookups(self) -> Vec<Lookup> {
        self.probes()
            .iter()
            .map(|p| Lookup {
                prefix: self.prefix(),
                definition: p.definition.map(str::to_string),
                identity: p.identity(),
                on_list_failure: self.on_list_failure(),
            })
            .collect()
    }
}

impl fmt::Display for WorkloadFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for WorkloadFamily {
    type Err = GateError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openkruise" | "kruise" => Ok(WorkloadFamily::OpenKruise),
            "tailscale" => Ok(WorkloadFamily::Tailscale),
            "traefik" => Ok(WorkloadFamily::Traefik),
            "system-upgrade" | "systemupgrade" => Ok(WorkloadFamily::SystemUpgrade),
            other => Err(GateError::BadRequest(format!("unknown workload family: {}", other))),
        }
    }
}

/// One kind reported in a family status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// Reported name.
    pub name: &'static str,
    /// Reported kind.
    pub kind: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    /// Plural actually listed; differs from `name` for the Advanced* kinds.
    pub plural: &'static str,
    /// `None` for builtin kinds.
    pub definition: Option<&'static str>,
    pub description: &'static str,
}

impl Probe {
    pub fn identity(&self) -> ResourceIdentity { ResourceIdentity::new(self.group, self.version, self.plural, self.kind) }
}

const fn kruise(name: &'static str, kind: &'static str, version: &'static str, plural: &'static str, definition: &'static str, description: &'static str) -> Probe {
    Probe { name, kind, group: "apps.kruise.io", version, plural, definition: Some(definition), description }
}

static KRUISE: [Probe; 15] = [
    kruise("clonesets", "CloneSet", "v1alpha1", "clonesets", "clonesets.apps.kruise.io", "CloneSet provides enhanced deployment capabilities"),
    kruise("advanceddaemonsets", "AdvancedDaemonSet", "v1alpha1", "daemonsets", "daemonsets.apps.kruise.io", "AdvancedDaemonSet provides enhanced DaemonSet capabilities"),
    kruise("advancedstatefulsets", "AdvancedStatefulSet", "v1beta1", "statefulsets", "statefulsets.apps.kruise.io", "AdvancedStatefulSet provides enhanced StatefulSet capabilities"),
    kruise("broadcastjobs", "BroadcastJob", "v1alpha1", "broadcastjobs", "broadcastjobs.apps.kruise.io", "BroadcastJob runs pods on all or selected nodes"),
    kruise("advancedcronjobs", "AdvancedCronJob", "v1alpha1", "advancedcronjobs", "advancedcronjobs.apps.kruise.io", "AdvancedCronJob provides enhanced CronJob capabilities"),
    kruise("sidecarsets", "SidecarSet", "v1alpha1", "sidecarsets", "sidecarsets.apps.kruise.io", "SidecarSet manages sidecar containers"),
    kruise("uniteddeployments", "UnitedDeployment", "v1alpha1", "uniteddeployments", "uniteddeployments.apps.kruise.io", "UnitedDeployment manages multi-domain deployments"),
    kruise("workloadspreads", "WorkloadSpread", "v1alpha1", "workloadspreads", "workloadspreads.apps.kruise.io", "WorkloadSpread constrains workload spread across domains"),
    kruise("imagepulljobs", "ImagePullJob", "v1alpha1", "imagepulljobs", "imagepulljobs.apps.kruise.io", "ImagePullJob pre-pulls images on nodes"),
    kruise("containerrecreaterequests", "ContainerRecreateRequest", "v1alpha1", "containerrecreaterequests", "containerrecreaterequests.apps.kruise.io", "ContainerRecreateRequest restarts containers in running pods"),
    kruise("resourcedistributions", "ResourceDistribution", "v1alpha1", "resourcedistributions", "resourcedistributions.apps.kruise.io", "ResourceDistribution distributes resources across namespaces"),
    kruise("persistentpodstates", "PersistentPodState", "v1alpha1", "persistentpodstates", "persistentpodstates.apps.kruise.io", "PersistentPodState maintains pod state across restarts"),
    kruise("podprobemarkers", "PodProbeMarker", "v1alpha1", "podprobemarkers", "podprobemarkers.apps.kruise.io", "PodProbeMarker customizes pod readiness probes"),
    kruise("nodeimages", "NodeImage", "v1alpha1", "nodeimages", "nodeimages.apps.kruise.io", "NodeImage manages image pre-downloading on nodes"),
    Probe {
        name: "podunavailablebudgets",
        kind: "PodUnavailableBudget",
        group: "policy.kruise.io",
        version: "v1alpha1",
        plural: "podunavailablebudgets",
        definition: Some("podunavailablebudgets.policy.kruise.io"),
        description: "PodUnavailableBudget protects application availability",
    },
];

fn describe(name: &str) -> &'static str {
    match name {
        "connectors" => "Connector manages subnet routers, exit nodes, and app connectors",
        "proxyclasses" => "ProxyClass customizes proxy configuration",
        "proxygroups" => "ProxyGroup manages high-availability proxy groups",
        "ingressroutes" => "IngressRoute manages HTTP/HTTPS routing rules",
        "ingressroutetcps" => "IngressRouteTCP manages TCP routing rules",
        "ingressrouteudps" => "IngressRouteUDP manages UDP routing rules",
        "middlewares" => "Middleware defines request/response processing rules",
        "middlewaretcps" => "MiddlewareTCP defines TCP processing rules",
        "tlsoptions" => "TLSOption defines TLS configuration options",
        "tlsstores" => "TLSStore defines TLS certificate stores",
        "traefikservices" => "TraefikService defines load balancing and service discovery",
        "serverstransports" => "ServersTransport defines transport configuration for backend servers",
        "plans" => "Plan defines upgrade specifications for nodes",
        _ => "",
    }
}

fn catalog_probes(family: Family) -> Vec<Probe> {
    static_kinds_of(family)
        .map(|sk| Probe {
            name: sk.name,
            kind: sk.kind,
            group: sk.group,
            version: sk.version,
            plural: sk.name,
            definition: Some(sk.definition_name),
            description: describe(sk.name),
        })
        .collect()
}

/// Where a family's controller image lives.
#[derive(Debug, Clone, Copy)]
pub struct VersionSource {
    pub namespace: &'static str,
    pub deployment: &'static str,
    pub containers: &'static [&'static str],
}

const fn vs(namespace: &'static str, deployment: &'static str, containers: &'static [&'static str]) -> VersionSource {
    VersionSource { namespace, deployment, containers }
}

const TS_CONTAINERS: &[&str] = &["operator", "tailscale-operator"];

static KRUISE_VERSION: &[VersionSource] = &[vs("kruise-system", "kruise-controller-manager", &["manager"])];
static TAILSCALE_VERSION: &[VersionSource] = &[
    vs("tailscale", "operator", TS_CONTAINERS),
    vs("tailscale", "tailscale-operator", TS_CONTAINERS),
    vs("kube-system", "tailscale-operator", TS_CONTAINERS),
    vs("default", "tailscale-operator", TS_CONTAINERS),
    vs("kube-system", "operator", TS_CONTAINERS),
];
static TRAEFIK_VERSION: &[VersionSource] = &[
    vs("traefik-system", "traefik", &["traefik"]),
    vs("traefik-v2", "traefik", &["traefik"]),
    vs("traefik", "traefik", &["traefik"]),
    vs("kube-system", "traefik", &["traefik"]),
    vs("default", "traefik", &["traefik"]),
];
static UPGRADE_VERSION: &[VersionSource] = &[
    vs("system-upgrade", "system-upgrade-controller", &["system-upgrade-controller"]),
    vs("cattle-system", "system-upgrade-controller", &["system-upgrade-controller"]),
    vs("kube-system", "system-upgrade-controller", &["system-upgrade-controller"]),
    vs("default", "system-upgrade-controller", &["system-upgrade-controller"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    pub name: String,
    pub kind: String,
    pub api_version: String,
    pub available: bool,
    pub count: usize,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyStatus {
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub workloads: Vec<WorkloadStatus>,
}

impl FamilyStatus {
    /// Installed when any definition-backed kind is available; builtin kinds never count.
    pub fn from_probes(probes: &[Probe], availability: &[Availability]) -> Self {
        let installed = probes.iter().zip(availability).any(|(p, a)| p.definition.is_some() && a.available);
        let workloads = probes
            .iter()
            .zip(availability)
            .map(|(p, a)| WorkloadStatus {
                name: p.name.to_string(),
                kind: p.kind.to_string(),
                api_version: p.identity().api_version(),
                available: a.available,
                count: a.count,
                description: p.description.to_string(),
            })
            .collect();
        Self { installed, version: None, workloads }
    }
}

/// Tag portion of an image reference. Floating tags and untagged images have no version.
pub fn extract_version_from_image(image: &str) -> Option<String> {
    let last = image.rsplit('/').next().unwrap_or(image);
    let (_, tag) = last.rsplit_once(':')?;
    match tag {
        "" | "latest" | "stable" | "main" | "master" => None,
        t => Some(t.to_string()),
    }
}

/// First version found among the sources, tried in order. Read errors and floating tags move on to the next source.
pub async fn detect_version(client: &dyn ClusterClient, sources: &[VersionSource]) -> Option<String> {
    let ar = ApiResource::erase::<Deployment>(&());
    for src in sources {
        let obj = match client.get(&ar, Some(src.namespace), src.deployment).await {
            Ok(o) => o,
            Err(e) => {
                debug!(ns = %src.namespace, deployment = %src.deployment, error = %e, "status: version source unavailable");
                continue;
            }
        };
        let Ok(dep) = serde_json::to_value(&obj).and_then(serde_json::from_value::<Deployment>) else { continue };
        let containers = dep.spec.and_then(|s| s.template.spec).map(|s| s.containers).unwrap_or_default();
        let found = containers
            .iter()
            .find(|c| src.containers.contains(&c.name.as_str()))
            .and_then(|c| c.image.as_deref())
            .and_then(extract_version_from_image);
        if found.is_some() {
            return found;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_tags() {
        assert_eq!(extract_version_from_image("openkruise/kruise-manager:v1.5.0").as_deref(), Some("v1.5.0"));
        assert_eq!(extract_version_from_image("registry.local:5000/traefik:v2.10.4").as_deref(), Some("v2.10.4"));
        assert_eq!(extract_version_from_image("tailscale/k8s-operator:stable"), None);
        assert_eq!(extract_version_from_image("rancher/system-upgrade-controller"), None);
        assert_eq!(extract_version_from_image("registry.local:5000/traefik"), None);
    }

    #[test]
    fn family_tables() {
        assert_eq!(WorkloadFamily::OpenKruise.probes().len(), 15);
        assert_eq!(WorkloadFamily::Tailscale.probes().len(), 3);
        assert_eq!(WorkloadFamily::Traefik.probes().len(), 9);
        assert_eq!(WorkloadFamily::SystemUpgrade.probes().len(), 2);
        for f in WorkloadFamily::ALL {
            assert!(f.probes().iter().all(|p| !p.description.is_empty()), "{}", f);
            assert_eq!(f.as_str().parse::<WorkloadFamily>().unwrap(), f);
        }
        let keys: Vec<_> = WorkloadFamily::OpenKruise.lookups().iter().map(Lookup::cache_key).collect();
        assert!(keys.contains(&"AdvancedStatefulSet:apps.kruise.io/v1beta1".to_string()));
        assert_eq!(WorkloadFamily::Traefik.lookups()[0].cache_key(), "traefik:IngressRoute:traefik.io/v1alpha1");
    }

    #[test]
    fn builtin_probes_do_not_make_a_family_installed() {
        let probes = WorkloadFamily::SystemUpgrade.probes();
        let off = Availability { available: false, count: 0 };
        let on = Availability { available: true, count: 3 };
        let s = FamilyStatus::from_probes(&probes, &[off, on]);
        assert!(!s.installed);
        assert_eq!(s.workloads[1].api_version, "batch/v1");
        assert_eq!(s.workloads[1].count, 3);
        assert!(FamilyStatus::from_probes(&probes, &[on, off]).installed);
    }

    #[test]
    fn status_serializes_camel_case_without_version() {
        let s = FamilyStatus::from_probes(&WorkloadFamily::Tailscale.probes()[..1], &[Availability::default()]);
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("version").is_none());
        assert_eq!(v["workloads"][0]["apiVersion"], "tailscale.com/v1alpha1");
    }
}
