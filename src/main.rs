//! Stratum CLI - materialize a cluster and its operators

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stratum::config::{ConfigOverrides, StackConfig};
use stratum::graph::ResourceKind;
use stratum::materializer::{Materialization, Materializer};
use stratum::provider::{
    GcpConfig, GcpProvider, KubeProvider, LocalProvider, ProviderSet, SimulatedProvider,
};
use stratum::stack::{Stack, StackOutputs};
use stratum::state::StateFile;
use stratum::DEFAULT_STATE_FILE;

/// Stratum - dependency-ordered materializer for a cluster and its operators
#[derive(Parser, Debug)]
#[command(name = "stratum", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct StackArgs {
    /// Stack configuration file
    #[arg(short = 'f', long = "config", default_value = "stack.yaml")]
    config: PathBuf,

    /// Cloud project, overriding the configuration file
    #[arg(long, env = "GCP_PROJECT")]
    project: Option<String>,

    /// Cluster zone, overriding the configuration file
    #[arg(long, env = "GCP_ZONE")]
    zone: Option<String>,

    /// State file recording materialized outputs
    #[arg(long, default_value = DEFAULT_STATE_FILE)]
    state: PathBuf,
}

impl StackArgs {
    fn load(&self) -> anyhow::Result<StackConfig> {
        let overrides = ConfigOverrides {
            project: self.project.clone(),
            zone: self.zone.clone(),
        };
        StackConfig::load(&self.config, &overrides)
            .with_context(|| format!("loading {}", self.config.display()))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create every resource in the stack
    ///
    /// Resources are created as soon as everything they depend on is ready.
    /// Outputs of every ready resource are recorded in the state file, even
    /// after a failed run, so that `destroy` can clean up.
    Up {
        #[command(flatten)]
        stack: StackArgs,

        /// Print secret outputs in clear text
        #[arg(long)]
        reveal: bool,
    },

    /// Show the resources in dependency order
    Plan {
        #[command(flatten)]
        stack: StackArgs,

        /// Materialize against a simulated provider and print the outputs
        #[arg(long)]
        simulate: bool,
    },

    /// Delete every recorded resource in reverse dependency order
    Destroy {
        #[command(flatten)]
        stack: StackArgs,
    },

    /// Print the exported outputs recorded in the state file
    Outputs {
        #[command(flatten)]
        stack: StackArgs,

        /// Print secret outputs in clear text
        #[arg(long)]
        reveal: bool,
    },

    /// Print the cluster kubeconfig recorded in the state file
    Kubeconfig {
        /// State file recording materialized outputs
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Up { stack, reveal } => up(&stack, reveal).await,
        Commands::Plan { stack, simulate } => plan(&stack, simulate).await,
        Commands::Destroy { stack } => destroy(&stack).await,
        Commands::Outputs { stack, reveal } => outputs(&stack, reveal),
        Commands::Kubeconfig { state } => kubeconfig(&state),
    }
}

/// Providers that talk to the cloud and the cluster
fn live_providers(config: &StackConfig) -> anyhow::Result<ProviderSet> {
    let mut gcp = GcpConfig::new(&config.project, &config.zone, config.region());
    gcp.source_dir = config.source_dir();
    let cloud = GcpProvider::new(gcp).context("configuring cloud provider")?;
    Ok(ProviderSet::new(
        Arc::new(cloud),
        Arc::new(KubeProvider::new(config.manifests_dir())),
        Arc::new(LocalProvider::new()),
    ))
}

async fn up(args: &StackArgs, reveal: bool) -> anyhow::Result<()> {
    let config = args.load()?;
    let stack = Stack::declare(&config)?;
    info!(
        project = %config.project,
        resources = stack.graph().len(),
        "materializing stack"
    );

    let materializer = Materializer::new(live_providers(&config)?, config.materializer.clone());
    let report = materializer.materialize_report(stack.graph()).await?;

    let recorded = Materialization::from_outputs(report.outputs.clone());
    StateFile::capture(&config.project, stack.graph(), &recorded)
        .save(&args.state)
        .with_context(|| format!("writing {}", args.state.display()))?;
    info!(state = %args.state.display(), recorded = recorded.len(), "state saved");

    if !report.is_success() {
        for (handle, err) in &report.failures {
            let id = stack.graph().resource(*handle)?.id.clone();
            error!(resource = %id, error = %err, "resource failed");
        }
        if !report.rolled_back.is_empty() {
            warn!(count = report.rolled_back.len(), "rolled back ready resources");
        }
        let err = report.into_result().err();
        return Err(match err {
            Some(e) => anyhow::Error::new(e).context("stack materialization failed"),
            None => anyhow::anyhow!("stack materialization failed"),
        });
    }

    let outputs = StackOutputs::collect(&stack, &recorded)?;
    print_outputs(&outputs, reveal)
}

async fn plan(args: &StackArgs, simulate: bool) -> anyhow::Result<()> {
    let config = args.load()?;
    let stack = Stack::declare(&config)?;
    let graph = stack.graph();

    if !simulate {
        for (position, handle) in graph.topological_order()?.into_iter().enumerate() {
            let resource = graph.resource(handle)?;
            let deps = graph
                .dependencies(handle)?
                .iter()
                .map(|dep| graph.resource(*dep).map(|r| r.id.to_string()))
                .collect::<stratum::Result<Vec<_>>>()?;
            if deps.is_empty() {
                println!("{:>3}. {}", position + 1, resource.id);
            } else {
                println!("{:>3}. {} <- {}", position + 1, resource.id, deps.join(", "));
            }
        }
        return Ok(());
    }

    let providers = ProviderSet::uniform(Arc::new(SimulatedProvider::new()));
    let result = Materializer::new(providers, config.materializer.clone())
        .materialize(graph)
        .await?;
    let outputs = StackOutputs::collect(&stack, &result)?;
    print_outputs(&outputs, false)
}

async fn destroy(args: &StackArgs) -> anyhow::Result<()> {
    let config = args.load()?;
    let state = StateFile::load(&args.state)?;
    if state.project != config.project {
        anyhow::bail!(
            "state {} belongs to project {}, not {}",
            args.state.display(),
            state.project,
            config.project
        );
    }

    let stack = Stack::declare(&config)?;
    let recorded = state.restore(stack.graph());
    if recorded.is_empty() {
        info!("nothing recorded; nothing to destroy");
        return Ok(());
    }

    let materializer = Materializer::new(live_providers(&config)?, config.materializer.clone());
    let destroyed = materializer.destroy(stack.graph(), &recorded).await?;
    info!(count = destroyed.len(), "stack destroyed");

    std::fs::remove_file(&args.state)
        .with_context(|| format!("removing {}", args.state.display()))?;
    Ok(())
}

fn outputs(args: &StackArgs, reveal: bool) -> anyhow::Result<()> {
    let config = args.load()?;
    let stack = Stack::declare(&config)?;
    let recorded = StateFile::load(&args.state)?.restore(stack.graph());
    let outputs = StackOutputs::collect(&stack, &recorded)?;
    print_outputs(&outputs, reveal)
}

fn kubeconfig(state: &Path) -> anyhow::Result<()> {
    let state = StateFile::load(state)?;
    let kubeconfig = state
        .resources
        .iter()
        .find(|entry| entry.kind == ResourceKind::Kubeconfig)
        .and_then(|entry| entry.outputs.get_str("kubeconfig"))
        .context("no kubeconfig recorded; run `stratum up` first")?;
    print!("{kubeconfig}");
    Ok(())
}

fn print_outputs(outputs: &StackOutputs, reveal: bool) -> anyhow::Result<()> {
    let value = if reveal {
        outputs.revealed()
    } else {
        outputs.redacted()
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
