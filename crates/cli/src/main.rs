use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use flowdash_feed::{batches, open_file, pump, stdin_source, FlowMessage, MessageSink, WriterSink};
use flowdash_graph::history::{human_duration, repo_commit_link, workflow_pod_name, WorkflowParams};
use flowdash_graph::{flow_graph, workflow_graph, FlowGraph};
use flowdash_store::{apply, spawn_ingest, BatchPolicy, IngestConfig, WorldState};
use futures::TryStreamExt;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "flowdashctl", version, about = "Flowdash CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to look in (workflow, history and logs) or filter by (watch)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// What to do with an event that fails to decode: isolate or abort
    #[arg(long = "policy", global = true)]
    policy: Option<BatchPolicy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply recorded feed files and print what ended up in the store
    Replay {
        /// Newline-delimited transport messages
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Print every applied change
        #[arg(long = "changes", action = ArgAction::SetTrue)]
        changes: bool,
    },
    /// Print the definition graph of a repository's flow
    FlowGraph {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Repository as org/name
        #[arg(long = "repo")]
        repo: String,
        /// Use the pull-request flow instead of the push flow
        #[arg(long = "pr", action = ArgAction::SetTrue)]
        pr: bool,
    },
    /// Print the run graph of one workflow
    WorkflowGraph {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Flow (sensor) that launched the workflow
        #[arg(long = "flow")]
        flow: String,
        #[arg(long = "workflow")]
        workflow: String,
    },
    /// List the runs of a flow, newest first
    History {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long = "flow")]
        flow: String,
        #[arg(long = "limit", default_value_t = 20)]
        limit: usize,
    },
    /// Print stored log lines for a workflow node, or the request to stream them
    Logs {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long = "flow")]
        flow: String,
        #[arg(long = "workflow")]
        workflow: String,
        /// Node display name
        #[arg(long = "node")]
        node: String,
        #[arg(long = "container", default_value = "main")]
        container: String,
        /// Emit the container-log request message instead of stored lines
        #[arg(long = "request", action = ArgAction::SetTrue)]
        request: bool,
    },
    /// Read transport messages from stdin and print +/- changes per snapshot
    Watch,
}

fn init_tracing() {
    let env = std::env::var("FLOWDASH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FLOWDASH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FLOWDASH_METRICS_ADDR; expected host:port");
        }
    }
}

/// Fold every batch of `files` into one state, in order. Aborted batches are
/// logged and leave the state as it was.
async fn load(files: &[PathBuf], policy: BatchPolicy) -> Result<(WorldState, Vec<flowdash_store::Change>)> {
    let mut state = WorldState::default();
    let mut changes = Vec::new();
    for path in files {
        let stream = batches(open_file(path).await?);
        futures::pin_mut!(stream);
        while let Some(batch) = stream.try_next().await? {
            match apply(&state, batch, policy) {
                Ok((next, report)) => {
                    if report.rejected > 0 {
                        warn!(file = %path.display(), epoch = next.epoch, rejected = report.rejected, "events rejected");
                    }
                    changes.extend(report.changes);
                    state = next;
                }
                Err(e) => warn!(file = %path.display(), error = %e, "batch aborted"),
            }
        }
    }
    info!(files = files.len(), epoch = state.epoch, "replay complete");
    Ok((state, changes))
}

fn require_ns(ns: Option<&str>) -> Result<&str> {
    ns.context("--ns is required for this command")
}

fn print_graph(graph: &FlowGraph, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            println!("NODES");
            for n in &graph.nodes {
                println!("  {:<40} {:>5}x{:<5}", n.label, n.width, n.height);
            }
            println!("EDGES");
            for e in &graph.edges {
                println!("  {:<4} {} -> {}", e.label, e.v, e.w);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(graph)?),
    }
    Ok(())
}

fn in_namespace(key: &str, ns: &str) -> bool {
    key.split_once('/').map(|(k, _)| k == ns).unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let mut cfg = IngestConfig::from_env();
    if let Some(policy) = cli.policy {
        cfg.policy = policy;
    }
    let ns = cli.namespace.as_deref();

    match cli.command {
        Commands::Replay { files, changes } => {
            let (state, applied) = load(&files, cfg.policy).await?;
            let counts = state.counts();
            match cli.output {
                Output::Human => {
                    if changes {
                        for c in &applied {
                            println!("{}", c);
                        }
                    }
                    println!("epoch: {}", state.epoch);
                    for (kind, n) in &counts {
                        println!("{:<14} {}", kind.as_str(), n);
                    }
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Summary<'a> {
                        epoch: u64,
                        counts: &'a std::collections::BTreeMap<flowdash_core::resource::ResourceKind, usize>,
                        #[serde(skip_serializing_if = "Option::is_none")]
                        changes: Option<&'a [flowdash_store::Change]>,
                    }
                    let summary = Summary { epoch: state.epoch, counts: &counts, changes: changes.then_some(applied.as_slice()) };
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
            }
        }
        Commands::FlowGraph { files, repo, pr } => {
            let (state, _) = load(&files, cfg.policy).await?;
            let Some(flow) = state.flow(&repo, pr) else {
                bail!("no {} flow for {}", if pr { "pr" } else { "push" }, repo);
            };
            let graph = flow_graph(flow)?;
            print_graph(&graph, cli.output)?;
        }
        Commands::WorkflowGraph { files, flow, workflow } => {
            let ns = require_ns(ns)?;
            let (state, _) = load(&files, cfg.policy).await?;
            let Some(wf) = state.workflow(ns, &flow, &workflow) else {
                bail!("no workflow {}/{} for flow {}", ns, workflow, flow);
            };
            let graph = workflow_graph(wf)?;
            print_graph(&graph, cli.output)?;
        }
        Commands::History { files, flow, limit } => {
            let ns = require_ns(ns)?;
            let (state, _) = load(&files, cfg.policy).await?;
            let runs = state.workflow_history(ns, &flow);
            let now = chrono::Utc::now();
            match cli.output {
                Output::Human => {
                    println!("{:<36} {:<10} {:<8} {:<9} REVISION", "NAME", "PHASE", "AGE", "DURATION");
                    for run in runs.iter().take(limit) {
                        let age = run
                            .memo
                            .started_at
                            .map(|t| human_duration((now - t).num_milliseconds()))
                            .unwrap_or_else(|| "-".to_string());
                        let params = WorkflowParams::of(run);
                        let revision = match (params.repo(), params.revision()) {
                            (Ok(repo), Ok(rev)) => repo_commit_link(repo, rev),
                            (_, Ok(rev)) => rev.to_string(),
                            _ => "-".to_string(),
                        };
                        println!(
                            "{:<36} {:<10} {:<8} {:<9} {}",
                            run.metadata.name,
                            format!("{:?}", run.status.phase),
                            age,
                            run.memo.duration.as_deref().unwrap_or("-"),
                            revision
                        );
                    }
                }
                Output::Json => {
                    let rows: Vec<_> = runs.iter().take(limit).map(|r| r.as_ref()).collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
        Commands::Logs { files, flow, workflow, node, container, request } => {
            let ns = require_ns(ns)?;
            let (state, _) = load(&files, cfg.policy).await?;
            let Some(wf) = state.workflow(ns, &flow, &workflow) else {
                bail!("no workflow {}/{} for flow {}", ns, workflow, flow);
            };
            let Some(status_node) = wf.nodes().find(|n| n.display_name == node) else {
                bail!("workflow {} has no node {}", workflow, node);
            };
            let pod = workflow_pod_name(&wf.metadata.name, status_node);
            if request {
                let mut sink = WriterSink::new(tokio::io::stdout());
                sink.send(&FlowMessage::container_log(ns, &pod, &container)).await?;
                return Ok(());
            }
            let lines = state.log_lines(ns, &pod, &container);
            match cli.output {
                Output::Human => match lines {
                    Some(lines) => {
                        for line in lines.lines() {
                            println!("{}", line);
                        }
                    }
                    None => eprintln!("no log lines stored for {}/{} ({})", ns, pod, container),
                },
                Output::Json => {
                    let lines: &[String] = lines.map(|l| l.lines()).unwrap_or_default();
                    println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "pod": pod, "lines": lines }))?);
                }
            }
        }
        Commands::Watch => {
            info!(ns = ?ns, policy = %cfg.policy, queue_cap = cfg.queue_cap, "watch invoked");
            let (ingest_tx, backend) = spawn_ingest(cfg);
            let mut reports = backend.subscribe_reports();
            let mut feed = tokio::spawn(pump(stdin_source(), ingest_tx));
            let mut feed_done = false;

            loop {
                tokio::select! {
                    received = reports.recv() => {
                        let report = match received {
                            Ok(report) => report,
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                warn!(missed, "watch fell behind; reports dropped");
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                info!("ingest loop drained; exiting watch loop");
                                break;
                            }
                        };
                        for change in &report.changes {
                            if let Some(ns_filter) = ns {
                                // cluster-scoped keys never match a namespace filter
                                if !in_namespace(&change.key, ns_filter) { continue; }
                            }
                            match cli.output {
                                Output::Human => println!("{}", change),
                                Output::Json => println!("{}", serde_json::to_string(change)?),
                            }
                        }
                    }
                    joined = &mut feed, if !feed_done => {
                        feed_done = true;
                        match joined {
                            Ok(Ok(sent)) => info!(sent, "stdin closed"),
                            Ok(Err(e)) => warn!(error = %e, "feed failed"),
                            Err(e) => warn!(error = %e, "feed task panicked"),
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; shutting down watch loop");
                        break;
                    }
                }
            }

            if !feed_done {
                feed.abort();
            }
            let snap = backend.current();
            info!(epoch = snap.epoch, "watch loop ended");
        }
    }

    Ok(())
}
