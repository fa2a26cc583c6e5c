//! Flow builder CLI: imports journey drafts, resolves their audiences and
//! reports whether they can go live.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use campaign_channels::{CatalogTemplate, InMemoryCatalog, TemplateCatalog};
use campaign_core::config::LogConfig;
use campaign_core::event_bus::BroadcastSink;
use campaign_core::{AppConfig, Channel, FlowError, NodeId};
use campaign_journey::{
    FlowDraft, GraphSettings, NodeView, RefreshCoordinator, ResolutionReport, ValidationReport,
};
use campaign_segmentation::{Segment, SegmentDirectory, TimeoutResolver};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "flow-builder")]
#[command(about = "Journey flow builder: draft import, audience resolution and validation")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables prefixed FLOW_BUILDER__ override it)
    #[arg(long, env = "FLOW_BUILDER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a draft, resolve its audiences and print the validation report
    Validate {
        /// Journey draft as JSON
        #[arg(long)]
        draft: PathBuf,

        /// Segment directory as a JSON array
        #[arg(long)]
        segments: Option<PathBuf>,
    },
    /// List active catalog templates for a channel
    Catalog {
        #[arg(long)]
        channel: Channel,

        /// Template catalog as a JSON array
        #[arg(long)]
        templates: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct ValidateOutput {
    steps: BTreeMap<String, NodeId>,
    nodes: Vec<NodeView>,
    resolutions: Vec<ResolutionReport>,
    report: ValidationReport,
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log.filter.as_str().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn read_json_list<T: serde::de::DeserializeOwned>(path: Option<&Path>) -> anyhow::Result<Vec<T>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn validate(config: &AppConfig, draft: &Path, segments: Option<&Path>) -> anyhow::Result<bool> {
    let segments: Vec<Segment> = read_json_list(segments)?;
    info!(segments = segments.len(), "Segment directory loaded");
    let resolver = TimeoutResolver::from_config(
        SegmentDirectory::from_segments(segments),
        &config.resolver,
    );

    let sink = Arc::new(BroadcastSink::new(config.events.broadcast_capacity));
    let mut events = sink.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(revision = event.revision, delta = ?event.delta, "Graph changed"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Graph event subscriber lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let raw = std::fs::read_to_string(draft)
        .with_context(|| format!("reading {}", draft.display()))?;
    let (graph, keys) = FlowDraft::from_json(&raw)?.build(GraphSettings::from_config(config), sink)?;
    let coordinator = RefreshCoordinator::new(graph, Arc::new(resolver));

    let dispatched = coordinator.pump();
    info!(lookups = dispatched, "Resolving audiences");
    let resolutions = coordinator.settle().await;

    let (nodes, report, gate) =
        coordinator.read(|g| (g.views(), g.validate(), g.ensure_activatable().map(|_| ())));
    let output = ValidateOutput {
        steps: keys.into_iter().collect(),
        nodes,
        resolutions,
        report,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    match gate {
        Ok(()) => {
            info!("Journey is activatable");
            Ok(true)
        }
        Err(err @ (FlowError::NotActivatable { .. } | FlowError::EmptyGraph)) => {
            error!(error = %err, "Journey cannot be activated");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

async fn catalog(channel: Channel, templates: Option<&Path>) -> anyhow::Result<()> {
    let templates: Vec<CatalogTemplate> = read_json_list(templates)?;
    let catalog = InMemoryCatalog::from_templates(templates);
    let listed = catalog.list_templates(channel).await;
    info!(%channel, templates = listed.len(), "Catalog listed");
    println!("{}", serde_json::to_string_pretty(&listed)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, load_error) = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    init_tracing(&config.log);
    if let Some(e) = load_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    match cli.command {
        Command::Validate { draft, segments } => {
            if !validate(&config, &draft, segments.as_deref()).await? {
                std::process::exit(1);
            }
        }
        Command::Catalog { channel, templates } => {
            catalog(channel, templates.as_deref()).await?;
        }
    }
    Ok(())
}
