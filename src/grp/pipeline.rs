//! The batch driver: load, normalize, embed, sweep k, ask for k, cluster,
//! summarize, export. Each stage consumes the whole output of the previous
//! one, and every side effect goes through an injected collaborator.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::elbow::{InertiaCurve, KSelector};
use super::embeddings::{Embeddings, ModelLoader, generate_embeddings};
use super::io::{ResultSink, TicketSource};
use super::kmeans::{ClusterAssigner, ClusterAssignment};
use super::model::Tickets;
use super::normalize::TextNormalizer;
use super::oracle::KOracle;
use super::summary::{ClusterReport, ResultSummarizer};
use crate::config::PipelineConfig;
use crate::display::progress::ProgressObserver;
use crate::display::viz::CurvePlotter;
use crate::error::Stage;

fn stage(stage: Stage) -> String {
    format!("stage {}", stage)
}

/// The outside world, as seen by one run.
pub struct Collaborators<'a> {
    pub source: &'a mut dyn TicketSource,
    pub loader: &'a dyn ModelLoader,
    pub oracle: &'a mut dyn KOracle,
    pub plotter: &'a mut dyn CurvePlotter,
    pub sink: &'a mut dyn ResultSink,
    pub progress: &'a dyn ProgressObserver,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub curve: InertiaCurve,
    pub assignment: ClusterAssignment,
    pub report: ClusterReport,
    pub chart: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub enum RunOutcome {
    /// Nothing survived normalization. No model was loaded and nothing
    /// was written.
    NoUsableTickets { total: usize },
    Completed(Box<RunReport>),
}

#[derive(Debug, Clone, Serialize)]
pub enum ElbowOutcome {
    NoUsableTickets { total: usize },
    Computed { curve: InertiaCurve, chart: PathBuf },
}

enum Prepared {
    Empty { total: usize },
    Ready(Tickets, Embeddings),
}

pub struct Pipeline {
    config: PipelineConfig,
    normalizer: TextNormalizer,
    selector: KSelector,
    assigner: ClusterAssigner,
    summarizer: ResultSummarizer,
}

impl Pipeline {
    /// Validate `config` and build every stage up front, so a bad setting
    /// fails before any input is read.
    pub fn new(config: PipelineConfig) -> crate::error::Result<Self> {
        config.validate()?;
        let normalizer = TextNormalizer::new(&config.normalizer)?;
        let assigner = ClusterAssigner::new(config.clustering.clone())?;
        let selector = KSelector::new(assigner.clone(), config.k_range()?);
        let summarizer = ResultSummarizer::new(config.summary.clone(), config.clustering.seed);
        Ok(Self {
            config,
            normalizer,
            selector,
            assigner,
            summarizer,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage.
    pub fn run(&self, c: Collaborators<'_>) -> Result<RunOutcome> {
        let (tickets, embeddings) = match self.prepare(c.source, c.loader, c.progress)? {
            Prepared::Empty { total } => return Ok(RunOutcome::NoUsableTickets { total }),
            Prepared::Ready(tickets, embeddings) => (tickets, embeddings),
        };

        let curve = self
            .selector
            .sweep(&embeddings, c.progress)
            .with_context(|| stage(Stage::Elbow))?;
        let chart = c.plotter.plot(&curve).with_context(|| stage(Stage::Elbow))?;

        // Duplicate tickets share a vector, so only distinct ones bound k.
        let k = c
            .oracle
            .choose_k(&curve, embeddings.distinct_count())
            .with_context(|| stage(Stage::Assign))?;
        info!(k = k.get(), "clustering with chosen k");
        let assignment = self
            .assigner
            .assign(&embeddings, k)
            .with_context(|| stage(Stage::Assign))?;
        let report = self
            .summarizer
            .summarize(&tickets, &assignment)
            .with_context(|| stage(Stage::Summarize))?;
        let output = c
            .sink
            .persist(&tickets, &assignment)
            .with_context(|| stage(Stage::Export))?;

        Ok(RunOutcome::Completed(Box::new(RunReport {
            curve,
            assignment,
            report,
            chart,
            output,
        })))
    }

    /// Stop after the inertia curve and its chart.
    pub fn elbow(
        &self,
        source: &mut dyn TicketSource,
        loader: &dyn ModelLoader,
        plotter: &mut dyn CurvePlotter,
        progress: &dyn ProgressObserver,
    ) -> Result<ElbowOutcome> {
        let embeddings = match self.prepare(source, loader, progress)? {
            Prepared::Empty { total } => return Ok(ElbowOutcome::NoUsableTickets { total }),
            Prepared::Ready(_, embeddings) => embeddings,
        };
        let curve = self
            .selector
            .sweep(&embeddings, progress)
            .with_context(|| stage(Stage::Elbow))?;
        let chart = plotter.plot(&curve).with_context(|| stage(Stage::Elbow))?;
        Ok(ElbowOutcome::Computed { curve, chart })
    }

    /// Load and clean the tickets, then embed them. When no ticket has any
    /// text left the model is never loaded.
    fn prepare(
        &self,
        source: &mut dyn TicketSource,
        loader: &dyn ModelLoader,
        progress: &dyn ProgressObserver,
    ) -> Result<Prepared> {
        let raw = source.load().with_context(|| stage(Stage::Load))?;
        let total = raw.len();
        let tickets = self.normalizer.prepare_tickets(raw);
        if tickets.is_empty() {
            warn!(
                stage = %Stage::Normalize,
                total,
                "no ticket has usable text after cleaning, nothing to cluster"
            );
            return Ok(Prepared::Empty { total });
        }

        let provider = loader
            .load(&self.config.model.reference)
            .with_context(|| stage(Stage::Embed))?;
        let embeddings = generate_embeddings(
            provider.as_ref(),
            &tickets.texts(),
            self.config.model.batch_size,
            progress,
        )
        .with_context(|| stage(Stage::Embed))?;
        Ok(Prepared::Ready(tickets, embeddings))
    }
}
