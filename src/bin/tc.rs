use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use grupos::{
    config::{PipelineConfig, default_config_file},
    display::{progress::BarProgress, viz::ElbowChart},
    grp::{
        embeddings::{ModelReference, RustBertLoader, SentenceEmbeddingsModelType},
        io::{CsvResultSink, open_ticket_source},
        kmeans::KMeansVariant,
        oracle::{FixedK, KOracle, PromptOracle},
        pipeline::{Collaborators, ElbowOutcome, Pipeline, RunOutcome},
    },
};
use tracing_subscriber::EnvFilter;

/// tc: A Ticket Clusterer
#[derive(Parser)]
#[command(name = "tc")]
#[command(about = "Group support tickets by the meaning of their text", long_about = None)]
struct Cli {
    /// TOML config file. Without it, ~/.config/grupos/config.toml is used
    /// when present, else built-in defaults.
    #[arg(short, long, global = true, env = "GRUPOS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Per-run overrides of config values.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// CSV file or workbook (.xlsx, .xls, .ods) with the tickets.
    #[arg(short, long, env = "GRUPOS_INPUT")]
    input: Option<PathBuf>,

    /// Directory holding a converted sentence-embedding model.
    #[arg(short, long, env = "GRUPOS_MODEL_PATH", conflicts_with = "pretrained")]
    model_path: Option<PathBuf>,

    /// Named pretrained model, downloaded on first use.
    #[arg(long, value_enum)]
    pretrained: Option<SentenceEmbeddingsModelType>,

    #[arg(long)]
    k_min: Option<usize>,

    #[arg(long)]
    k_max: Option<usize>,

    #[arg(long, env = "GRUPOS_SEED")]
    seed: Option<u64>,

    #[arg(long)]
    restarts: Option<usize>,

    #[arg(long, value_enum)]
    variant: Option<KMeansVariant>,

    /// Where the export and (if relative) the chart are written.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(path) = &self.input {
            config.input.path = path.clone();
        }
        if let Some(path) = &self.model_path {
            config.model.reference = ModelReference::Path(path.clone());
        }
        if let Some(model) = self.pretrained {
            config.model.reference = ModelReference::Pretrained(model);
        }
        if let Some(k) = self.k_min {
            config.elbow.k_min = k;
        }
        if let Some(k) = self.k_max {
            config.elbow.k_max = k;
        }
        if let Some(seed) = self.seed {
            config.clustering.seed = seed;
        }
        if let Some(restarts) = self.restarts {
            config.clustering.restarts = restarts;
        }
        if let Some(variant) = self.variant {
            config.clustering.variant = variant;
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline: elbow curve, choose k, cluster, summarize, export.
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Use this k instead of asking after the elbow curve.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Compute and plot the elbow curve only.
    Elbow {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Write the default configuration as TOML.
    InitConfig {
        /// Defaults to ~/.config/grupos/config.toml.
        #[arg(short, long)]
        path: Option<PathBuf>,

        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { overrides, k } => handle_run(cli.config.as_deref(), overrides, *k),
        Commands::Elbow { overrides } => handle_elbow(cli.config.as_deref(), overrides),
        Commands::InitConfig { path, force } => handle_init_config(path.as_deref(), *force),
    }
}

fn build_pipeline(config_path: Option<&Path>, overrides: &Overrides) -> Result<Pipeline> {
    let mut config = PipelineConfig::resolve(config_path)?;
    overrides.apply(&mut config);
    Ok(Pipeline::new(config)?)
}

fn chart_for(config: &PipelineConfig) -> ElbowChart {
    ElbowChart::new(
        config.output.chart_path(),
        config.output.chart_width,
        config.output.chart_height,
    )
}

/// Handle a run command.
/// - `k`: when given, skips the prompt; an out-of-range value is fatal.
fn handle_run(config_path: Option<&Path>, overrides: &Overrides, k: Option<usize>) -> Result<()> {
    let pipeline = build_pipeline(config_path, overrides)?;
    let config = pipeline.config();

    let mut source = open_ticket_source(&config.input.path, config.input.columns.clone());
    let mut sink = CsvResultSink::new(
        &config.output.dir,
        &config.output.prefix,
        config.input.columns.clone(),
    );
    let mut plotter = chart_for(config);
    let progress = BarProgress::new();
    let mut oracle: Box<dyn KOracle> = match k {
        Some(k) => Box::new(FixedK(k)),
        None => Box::new(PromptOracle::new(std::io::stdin().lock(), std::io::stdout())),
    };

    let outcome = pipeline.run(Collaborators {
        source: source.as_mut(),
        loader: &RustBertLoader,
        oracle: oracle.as_mut(),
        plotter: &mut plotter,
        sink: &mut sink,
        progress: &progress,
    })?;

    match outcome {
        RunOutcome::NoUsableTickets { total } => {
            println!(
                "None of the {} tickets has usable text after cleaning; nothing to cluster.",
                total
            );
        }
        RunOutcome::Completed(run) => {
            print!("{}", run.report.render()?);
            println!("\nElbow chart: {}", run.chart.display());
            println!("Results saved to {}", run.output.display());
        }
    }
    Ok(())
}

fn handle_elbow(config_path: Option<&Path>, overrides: &Overrides) -> Result<()> {
    let pipeline = build_pipeline(config_path, overrides)?;
    let config = pipeline.config();

    let mut source = open_ticket_source(&config.input.path, config.input.columns.clone());
    let mut plotter = chart_for(config);
    let progress = BarProgress::new();

    match pipeline.elbow(source.as_mut(), &RustBertLoader, &mut plotter, &progress)? {
        ElbowOutcome::NoUsableTickets { total } => {
            println!(
                "None of the {} tickets has usable text after cleaning; nothing to plot.",
                total
            );
        }
        ElbowOutcome::Computed { curve, chart } => {
            print!("{}", curve);
            println!("\nElbow chart: {}", chart.display());
        }
    }
    Ok(())
}

fn handle_init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_file()?,
    };
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite it", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("init-config: create {}", parent.display()))?;
    }
    std::fs::write(&path, PipelineConfig::default().to_toml()?)
        .with_context(|| format!("init-config: write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
