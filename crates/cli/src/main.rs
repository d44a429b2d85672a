use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use serde_json::{json, Value};
use tether_core::{from_projection, Document, KindId, ManagedRef, ObjectKey, PathExpr, ReconcilerConfig, Step};
use tether_kubehub::KubeStore;
use tether_reconciler::{LifecycleOptions, Reconciler, Resource, Template};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tetherctl", version, about = "Tether CLI: path queries and one-shot reconcile passes")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace of the owner (default: cluster-scoped lookup)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate path expressions against a YAML/JSON document
    Paths {
        #[command(subcommand)]
        op: PathsOp,
    },
    /// Run reconcile passes for one owner against the cluster
    Reconcile {
        /// Owner GVK key, e.g. "example.com/v1/App"
        #[arg(long = "owner")]
        owner: String,
        /// Owner name
        #[arg(long = "name")]
        name: String,
        /// Multi-document YAML of child templates
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Reconciler config YAML (defaults, annotation domain, pruner switch)
        #[arg(long = "config", env = "TETHER_CONFIG")]
        config: Option<PathBuf>,
        /// Finalizer kept on the owner while it exists
        #[arg(long = "finalizer")]
        finalizer: Option<String>,
        /// Ensure path applied to every child (overrides per-kind defaults)
        #[arg(long = "ensure")]
        ensure: Vec<String>,
        /// Ignore path applied to every child
        #[arg(long = "ignore")]
        ignore: Vec<String>,
        /// Keep running: re-run on owned-object events until Ctrl-C
        #[arg(long = "watch", action = ArgAction::SetTrue)]
        watch: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PathsOp {
    /// Print every value the expression matches
    Get {
        /// Path expression, e.g. "spec.ports[?(@.name=='http')].port"
        expr: String,
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("TETHER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TETHER_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TETHER_METRICS_ADDR; expected host:port");
        }
    }
}

/// Every document of a (possibly multi-document) YAML stream as JSON; empty documents are skipped.
fn read_yaml_docs(path: &PathBuf) -> Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut out = Vec::new();
    for de in serde_yaml::Deserializer::from_str(&raw) {
        let v = Value::deserialize(de).with_context(|| format!("parsing {}", path.display()))?;
        if !v.is_null() {
            out.push(v);
        }
    }
    Ok(out)
}

/// Child templates from the file; children without a namespace land in the owner's.
fn load_templates(path: &PathBuf, owner_ns: Option<&str>, ensure: &[String], ignore: &[String]) -> Result<Vec<Box<dyn Resource>>> {
    let mut out: Vec<Box<dyn Resource>> = Vec::new();
    for (i, v) in read_yaml_docs(path)?.into_iter().enumerate() {
        let mut doc: Document = from_projection(v).with_context(|| format!("document {} is not a Kubernetes object", i))?;
        if doc.types.is_none() {
            return Err(anyhow!("document {} lacks apiVersion/kind", i));
        }
        if doc.metadata.namespace.is_none() {
            doc.metadata.namespace = owner_ns.map(|s| s.to_string());
        }
        let t = Template::from_object(doc).with_ensure(ensure.iter().cloned()).with_ignore(ignore.iter().cloned());
        out.push(Box::new(t));
    }
    Ok(out)
}

fn print_matches(output: Output, matches: &[&Value]) -> Result<()> {
    match output {
        Output::Human => {
            for m in matches {
                match m {
                    Value::String(s) => println!("{}", s),
                    other => println!("{}", serde_json::to_string(other)?),
                }
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(matches)?),
    }
    Ok(())
}

fn step_label(step: &Step) -> String {
    match step {
        Step::Continue => "continue".into(),
        Step::Return => "return".into(),
        Step::ReturnAndRequeue { after: None } => "requeue".into(),
        Step::ReturnAndRequeue { after: Some(d) } => format!("requeue after {:?}", d),
    }
}

fn print_outcome(output: Output, owner: &ObjectKey, step: &Step, managed: &[ManagedRef], took: Duration) -> Result<()> {
    match output {
        Output::Human => {
            println!("owner {} • {} • {} ms", owner, step_label(step), took.as_millis());
            for m in managed {
                let ns = m.namespace.as_deref().unwrap_or("-");
                println!("{} • {} • {}/{}", m.api_version, m.kind, ns, m.name);
            }
        }
        Output::Json => {
            let out = json!({
                "owner": owner.to_string(),
                "step": step_label(step),
                "managed": managed,
                "tookMs": took.as_millis() as u64,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

/// One full pass: owner lifecycle, then converge every child, then prune.
async fn run_pass(
    r: &Reconciler,
    key: &ObjectKey,
    opts: &LifecycleOptions,
    resources: &[Box<dyn Resource>],
) -> Result<(Step, Vec<ManagedRef>)> {
    let inst = r.get_instance(key, opts).await?;
    let owner = match (inst.step, inst.instance) {
        (Step::Continue, Some(owner)) => owner,
        (step, _) => return Ok((step, Vec::new())),
    };
    let managed = r.reconcile_owned(&owner, resources).await?;
    Ok((Step::Continue, managed))
}

#[allow(clippy::too_many_arguments)]
async fn reconcile(
    output: Output,
    namespace: Option<String>,
    owner: String,
    name: String,
    file: PathBuf,
    config: Option<PathBuf>,
    finalizer: Option<String>,
    ensure: Vec<String>,
    ignore: Vec<String>,
    watch: bool,
) -> Result<()> {
    let owner_kind: KindId = owner.parse()?;
    let cfg = match config {
        Some(p) => ReconcilerConfig::load(&p)?,
        None => ReconcilerConfig::default(),
    }
    .with_env_overrides();
    let key = ObjectKey::new(namespace.as_deref(), &name);
    let resources = load_templates(&file, namespace.as_deref(), &ensure, &ignore)?;
    info!(owner = %owner_kind, key = %key, children = resources.len(), "reconcile invoked");

    let store = KubeStore::connect().await?;
    let scheme = Arc::new(store.scheme());
    let mut opts = LifecycleOptions::new();
    if let Some(f) = finalizer {
        opts = opts.with_finalizer(f);
    }

    if !watch {
        let r = Reconciler::new(Arc::new(store), scheme, cfg, owner_kind);
        r.init()?;
        let t0 = Instant::now();
        let (step, managed) = run_pass(&r, &key, &opts, &resources).await?;
        return print_outcome(output, &key, &step, &managed, t0.elapsed());
    }

    let (tx, mut rx) = mpsc::channel::<ObjectKey>(256);
    let registrar = Arc::new(store.registrar(namespace.as_deref(), tx));
    let r = Reconciler::new(Arc::new(store), scheme, cfg, owner_kind).with_registrar(registrar.clone());
    r.init()?;

    let mut requeue: Option<Duration> = None;
    loop {
        let t0 = Instant::now();
        match run_pass(&r, &key, &opts, &resources).await {
            Ok((step, managed)) => {
                print_outcome(output, &key, &step, &managed, t0.elapsed())?;
                requeue = match step {
                    Step::ReturnAndRequeue { after } => Some(after.unwrap_or(Duration::ZERO)),
                    _ => None,
                };
            }
            Err(e) => {
                error!(error = %e, key = %key, "reconcile pass failed");
                requeue = Some(requeue.map(|d| (d * 2).clamp(Duration::from_secs(1), Duration::from_secs(60))).unwrap_or(Duration::from_secs(1)));
            }
        }

        let sleep = tokio::time::sleep(requeue.unwrap_or(Duration::from_secs(3600)));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(k) if k == key => break,
                    Some(_) => continue,
                    None => {
                        warn!("owned-event channel closed; exiting reconcile loop");
                        registrar.shutdown();
                        return Ok(());
                    }
                },
                _ = &mut sleep => break,
                _ = signal::ctrl_c() => {
                    info!("Ctrl-C received; shutting down reconcile loop");
                    registrar.shutdown();
                    return Ok(());
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Paths { op: PathsOp::Get { expr, file } } => {
            let path = PathExpr::parse(&expr)?;
            let docs = read_yaml_docs(&file)?;
            let root = docs.into_iter().next().ok_or_else(|| anyhow!("{} holds no document", file.display()))?;
            print_matches(cli.output, &path.get(&root))?;
        }
        Commands::Reconcile { owner, name, file, config, finalizer, ensure, ignore, watch } => {
            if let Err(e) = reconcile(cli.output, cli.namespace, owner, name, file, config, finalizer, ensure, ignore, watch).await {
                error!(error = ?e, "reconcile failed");
                return Err(e);
            }
        }
    }
    Ok(())
}
