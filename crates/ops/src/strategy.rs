//! Pod-template mutations that force a new rollout.

use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{EnvVar, PodTemplateSpec};

/// Sentinel environment variable written into every container by the env strategy.
pub const RESTART_ENV: &str = "RESTARTED_AT";
/// Pod-template annotation written by the annotation strategy.
pub const RESTART_ANNOTATION: &str = "kubegate.io/restartedAt";

/// RFC 3339 UTC timestamp with nanoseconds; two restarts in the same second stay ordered.
pub fn restart_timestamp() -> String { Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true) }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStrategy {
    /// Replace `RESTARTED_AT` in every container, keeping other variables in order.
    Env,
    /// Set `kubegate.io/restartedAt` on the template metadata.
    Annotation,
}

impl RestartStrategy {
    pub fn apply(self, template: &mut PodTemplateSpec, ts: &str) {
        match self {
            RestartStrategy::Env => {
                let Some(spec) = template.spec.as_mut() else { return };
                for c in spec.containers.iter_mut() {
                    let env = c.env.get_or_insert_with(Vec::new);
                    env.retain(|e| e.name != RESTART_ENV);
                    env.push(EnvVar { name: RESTART_ENV.to_string(), value: Some(ts.to_string()), value_from: None });
                }
            }
            RestartStrategy::Annotation => {
                let meta = template.metadata.get_or_insert_with(Default::default);
                meta.annotations.get_or_insert_with(Default::default).insert(RESTART_ANNOTATION.to_string(), ts.to_string());
            }
        }
    }
}
