use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kube::core::DynamicObject;
use kubegate_api::{Config, FamilyStatus, GateApi, InProcApi, WorkloadFamily};
use kubegate_core::{ErasedList, GateError, ListOptions};
use kubegate_ops::OperationResult;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kubegatectl", version, about = "kubegate CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace; omitted or `_all` lists across namespaces
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Custom resources addressed by definition name, e.g. "clonesets.apps.kruise.io"
    Cr {
        #[command(subcommand)]
        cmd: ObjectCmd,
    },
    /// Operator kinds from the built-in catalog, e.g. "middlewares"
    Kind {
        #[command(subcommand)]
        cmd: ObjectCmd,
    },
    /// Set the replica count of a workload
    Scale {
        /// Workload type, e.g. "clonesets" or "Deployment"
        workload: String,
        name: String,
        replicas: i64,
    },
    /// Roll the pods of a workload by stamping its pod template(s)
    Restart {
        workload: String,
        name: String,
    },
    /// Installed kinds, counts and controller version of an operator family
    Status {
        /// openkruise | tailscale | traefik | system-upgrade
        family: String,
        /// Re-poll every N seconds until Ctrl-C
        #[arg(long = "watch")]
        watch: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum ObjectCmd {
    Ls {
        target: String,
        /// Label selector, e.g. "app=web"
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        #[arg(long = "limit")]
        limit: Option<u32>,
        #[arg(long = "continue")]
        continue_token: Option<String>,
    },
    Get { target: String, name: String },
    Delete { target: String, name: String },
    /// Create or update from a YAML/JSON file
    Apply {
        target: String,
        #[arg(short = 'f', long = "file")]
        file: String,
    },
}

fn init_tracing() {
    let env = std::env::var("KUBEGATE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    if let Some(addr) = addr {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KUBEGATE_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::from_env();
    init_metrics(config.metrics_addr.as_deref());
    let cli = Cli::parse();
    let api = InProcApi::connect(config).await.context("connecting to cluster")?;
    let ns = cli.namespace.as_deref();

    match cli.command {
        Commands::Cr { cmd } => run_objects(&api, Target::Definition, cmd, ns, cli.output).await?,
        Commands::Kind { cmd } => run_objects(&api, Target::Catalog, cmd, ns, cli.output).await?,
        Commands::Scale { workload, name, replicas } => {
            let ns = ns.unwrap_or("default");
            info!(workload = %workload, ns = %ns, name = %name, replicas, "scale invoked");
            match api.scale(&workload, ns, &name, &serde_json::json!({ "replicas": replicas })).await {
                Ok(r) => print_result(&r, cli.output)?,
                Err(e) => report("scale", &e),
            }
        }
        Commands::Restart { workload, name } => {
            let ns = ns.unwrap_or("default");
            info!(workload = %workload, ns = %ns, name = %name, "restart invoked");
            let r = api.restart(&workload, ns, &name).await;
            print_result(&r, cli.output)?;
        }
        Commands::Status { family, watch } => {
            let family = match WorkloadFamily::from_str(&family) {
                Ok(f) => f,
                Err(e) => {
                    report("status", &e);
                    return Ok(());
                }
            };
            let Some(secs) = watch else {
                let status = api.family_status(family).await?;
                print_status(&status, cli.output)?;
                return Ok(());
            };
            let sweeper = api.spawn_sweeper();
            let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let status = api.family_status(family).await?;
                        print_status(&status, cli.output)?;
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; stopping status watch");
                        break;
                    }
                }
            }
            sweeper.abort();
        }
    }

    Ok(())
}

#[derive(Clone, Copy)]
enum Target { Definition, Catalog }

async fn run_objects(api: &InProcApi, t: Target, cmd: ObjectCmd, ns: Option<&str>, out: Output) -> Result<()> {
    match cmd {
        ObjectCmd::Ls { target, selector, limit, continue_token } => {
            let opts = ListOptions { limit, continue_token, label_selector: selector, field_selector: None };
            let res = match t {
                Target::Definition => api.cr_list(&target, ns, &opts).await,
                Target::Catalog => api.kind_list(&target, ns, &opts).await,
            };
            match res {
                Ok(list) => print_list(&list, out)?,
                Err(e) => report("ls", &e),
            }
        }
        ObjectCmd::Get { target, name } => {
            let res = match t {
                Target::Definition => api.cr_get(&target, ns, &name).await,
                Target::Catalog => api.kind_get(&target, ns, &name).await,
            };
            match res {
                Ok(obj) => print_object(&obj, out)?,
                Err(e) => report("get", &e),
            }
        }
        ObjectCmd::Delete { target, name } => {
            let res = match t {
                Target::Definition => api.cr_delete(&target, ns, &name).await,
                Target::Catalog => api.kind_delete(&target, ns, &name).await,
            };
            match res {
                Ok(()) => println!("deleted {}", name),
                Err(e) => report("delete", &e),
            }
        }
        ObjectCmd::Apply { target, file } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file))?;
            let body: serde_json::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", file))?;
            let name = body
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .context("manifest has no metadata.name")?;
            let ns = ns.or_else(|| body.get("metadata").and_then(|m| m.get("namespace")).and_then(|v| v.as_str())).map(str::to_string);
            let ns = ns.as_deref();
            let existing = match t {
                Target::Definition => api.cr_get(&target, ns, &name).await,
                Target::Catalog => api.kind_get(&target, ns, &name).await,
            };
            let res = match (existing, t) {
                (Ok(_), Target::Definition) => api.cr_update(&target, ns, &name, body).await,
                (Ok(_), Target::Catalog) => api.kind_update(&target, ns, &name, body).await,
                (Err(GateError::NotFound(_)), Target::Definition) => api.cr_create(&target, ns, body).await,
                (Err(GateError::NotFound(_)), Target::Catalog) => api.kind_create(&target, ns, body).await,
                (Err(e), _) => Err(e),
            };
            match res {
                Ok(obj) => {
                    info!(name = %name, rv = ?obj.metadata.resource_version, "apply ok");
                    print_object(&obj, out)?;
                }
                Err(e) => report("apply", &e),
            }
        }
    }
    Ok(())
}

fn report(what: &str, e: &GateError) {
    error!(op = what, status = e.status_code(), error = %e, "request failed");
    eprintln!("{} error ({}): {}", what, e.status_code(), e.message());
}

fn print_list(list: &ErasedList, out: Output) -> Result<()> {
    match out {
        Output::Human => {
            println!("NAMESPACE   NAME                 AGE");
            for item in &list.items {
                let ns_col = item.metadata.namespace.clone().unwrap_or_else(|| "-".to_string());
                let name = item.metadata.name.as_deref().unwrap_or("");
                println!("{:<11} {:<20} {}", ns_col, name, render_age(item));
            }
            if let Some(token) = &list.continue_token {
                warn!(items = list.len(), "more results available");
                eprintln!("continue: {}", token);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(list)?),
    }
    Ok(())
}

fn print_object(obj: &DynamicObject, out: Output) -> Result<()> {
    match out {
        Output::Human => print!("{}", serde_yaml::to_string(obj)?),
        Output::Json => println!("{}", serde_json::to_string_pretty(obj)?),
    }
    Ok(())
}

fn print_result(r: &OperationResult, out: Output) -> Result<()> {
    match out {
        Output::Human => {
            if r.success {
                println!("{}", r.message);
                if let Some(ts) = &r.restarted_at { println!("restartedAt: {}", ts); }
            } else {
                eprintln!("{}: {}", r.message, r.error.as_deref().unwrap_or("unknown error"));
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(r)?),
    }
    Ok(())
}

fn print_status(s: &FamilyStatus, out: Output) -> Result<()> {
    match out {
        Output::Human => {
            println!("installed: {}  version: {}", s.installed, s.version.as_deref().unwrap_or("-"));
            println!("KIND                        AVAILABLE  COUNT  API VERSION");
            for w in &s.workloads {
                println!("{:<27} {:<10} {:<6} {}", w.kind, w.available, w.count, w.api_version);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(s)?),
    }
    Ok(())
}

fn render_age(obj: &DynamicObject) -> String {
    let Some(created) = obj.metadata.creation_timestamp.as_ref() else { return "-".to_string() };
    let mut secs = (chrono::Utc::now() - created.0).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}
