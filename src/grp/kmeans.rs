//! Centroid-based partitioning of embedding vectors.
//!
//! Two variants share one entry point:
//! - [`KMeansVariant::Full`] runs Lloyd iterations over the whole matrix,
//!   with `restarts` k-means++ initializations drawn from one seeded RNG.
//! - [`KMeansVariant::Incremental`] feeds shuffled mini-batches to the
//!   incremental fitter, one seeded shuffle per restart, which keeps only a
//!   batch's worth of distances alive at a time.
//!
//! Either way the final labels and inertia are computed against the full
//! matrix from the winning centroids: each vector goes to its nearest
//! centroid by Euclidean distance, ties to the lower index.

use linfa::DatasetBase;
use linfa::traits::{Fit, FitWith};
use linfa_clustering::{IncrKMeansError, KMeans, KMeansInit};
use ndarray::prelude::*;
use rand::{SeedableRng, seq::SliceRandom};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};
use tracing::{debug, warn};

use super::embeddings::Embeddings;
use super::model::{ClusterCount, ClusterLabel};
use crate::error::{PipelineError, Result, Stage};

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    IntoStaticStr,
    EnumString,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum KMeansVariant {
    #[default]
    Full,
    Incremental,
}

/// Hyperparameters for every clustering run. Outcomes are sensitive to
/// `seed` and `restarts`, so both are explicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansSettings {
    pub seed: u64,
    pub restarts: usize,
    /// Lloyd iterations per restart (full), or mini-batch steps per restart
    /// (incremental).
    pub max_iterations: u64,
    pub tolerance: f32,
    pub variant: KMeansVariant,
    /// Rows per mini-batch; raised to `k` when smaller.
    pub batch_size: usize,
}

impl Default for KMeansSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            restarts: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            variant: KMeansVariant::Full,
            batch_size: 1024,
        }
    }
}

impl KMeansSettings {
    pub fn validate(&self) -> Result<()> {
        if self.restarts == 0 {
            return Err(PipelineError::invalid("restarts", "must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(PipelineError::invalid("max_iterations", "must be at least 1"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(PipelineError::invalid(
                "tolerance",
                format!("{} is not a positive number", self.tolerance),
            ));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::invalid("batch_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// One label per input vector, in input order, plus the inertia of the
/// partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub k: ClusterCount,
    pub labels: Vec<ClusterLabel>,
    /// Sum of squared distances of each vector to its centroid.
    pub inertia: f64,
}

impl ClusterAssignment {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Row indices per label, `k` entries, some possibly empty.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.k.get()];
        for (idx, label) in self.labels.iter().enumerate() {
            members[**label].push(idx);
        }
        members
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusterAssigner {
    settings: KMeansSettings,
}

impl ClusterAssigner {
    pub fn new(settings: KMeansSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &KMeansSettings {
        &self.settings
    }

    /// Partition `embeddings` into `k` clusters, keeping the lowest-inertia
    /// restart.
    pub fn assign(&self, embeddings: &Embeddings, k: ClusterCount) -> Result<ClusterAssignment> {
        self.check_k(embeddings, k)?;
        let observations = embeddings.as_ndarray()?;

        let (centroids, labels, inertia) = match self.settings.variant {
            KMeansVariant::Full => {
                let centroids = self.fit_full(&observations, k.get())?;
                let (labels, inertia) = nearest_centroids(&observations, &centroids);
                (centroids, labels, inertia)
            }
            KMeansVariant::Incremental => {
                let mut best: Option<(Array2<f32>, Vec<ClusterLabel>, f64)> = None;
                for restart in 0..self.settings.restarts {
                    let centroids = self.fit_incremental(&observations, k.get(), restart)?;
                    let (labels, inertia) = nearest_centroids(&observations, &centroids);
                    debug!(k = k.get(), restart, inertia, "incremental restart finished");
                    if best.as_ref().is_none_or(|(_, _, b)| inertia < *b) {
                        best = Some((centroids, labels, inertia));
                    }
                }
                best.ok_or_else(|| PipelineError::Clustering("no restart completed".into()))?
            }
        };
        debug!(k = k.get(), inertia, centroids = centroids.nrows(), "clustering finished");

        Ok(ClusterAssignment { k, labels, inertia })
    }

    fn check_k(&self, embeddings: &Embeddings, k: ClusterCount) -> Result<()> {
        embeddings.require_rows(Stage::Assign, 1)?;
        if k.get() > embeddings.len() {
            return Err(PipelineError::invalid(
                "k",
                format!(
                    "{} clusters requested but only {} tickets are available",
                    k,
                    embeddings.len()
                ),
            ));
        }
        let distinct = embeddings.distinct_count();
        if k.get() > distinct {
            warn!(k = k.get(), distinct, "fewer distinct vectors than clusters");
            return Err(PipelineError::invalid(
                "k",
                format!(
                    "{} clusters requested but only {} tickets have distinct embeddings",
                    k, distinct
                ),
            ));
        }
        Ok(())
    }

    /// Lloyd's algorithm via linfa; `n_runs` restarts share one seeded RNG.
    fn fit_full(&self, observations: &Array2<f32>, k: usize) -> Result<Array2<f32>> {
        let rng = StdRng::seed_from_u64(self.settings.seed);
        let dataset = DatasetBase::from(observations.view());
        let model: KMeans<f32, _> = KMeans::params_with_rng(k, rng)
            .n_runs(self.settings.restarts)
            .max_n_iterations(self.settings.max_iterations)
            .tolerance(self.settings.tolerance)
            .init_method(KMeansInit::KMeansPlusPlus)
            .fit(&dataset)
            .map_err(|e| PipelineError::Clustering(format!("k={}: {}", k, e)))?;
        Ok(model.centroids().to_owned())
    }

    /// Mini-batch k-means via linfa's incremental fitter. Restart `restart`
    /// seeds its own RNG from `seed + restart`, shuffles the rows with it,
    /// and cycles over fixed-size chunks until the centroids settle or the
    /// step budget runs out.
    fn fit_incremental(
        &self,
        observations: &Array2<f32>,
        k: usize,
        restart: usize,
    ) -> Result<Array2<f32>> {
        let mut rng = StdRng::seed_from_u64(self.settings.seed.wrapping_add(restart as u64));
        let mut order = (0..observations.nrows()).collect::<Vec<usize>>();
        order.shuffle(&mut rng);
        let shuffled = observations.select(Axis(0), &order);

        // The first batch seeds the centroids, so it must hold at least k rows.
        let batch_size = self.settings.batch_size.max(k);
        let batches = shuffled
            .axis_chunks_iter(Axis(0), batch_size)
            .map(DatasetBase::from)
            .collect::<Vec<_>>();

        let params = KMeans::params_with_rng(k, rng)
            .tolerance(self.settings.tolerance)
            .init_method(KMeansInit::KMeansPlusPlus);

        let mut model: Option<KMeans<f32, _>> = None;
        for step in 0..self.settings.max_iterations {
            let batch = &batches[step as usize % batches.len()];
            match params.fit_with(model.take(), batch) {
                Ok(converged) => {
                    debug!(k, restart, step, "incremental fit converged");
                    model = Some(converged);
                    break;
                }
                Err(IncrKMeansError::NotConverged(partial)) => model = Some(partial),
                Err(e) => {
                    return Err(PipelineError::Clustering(format!("k={}: {}", k, e)));
                }
            }
        }

        model
            .map(|m| m.centroids().to_owned())
            .ok_or_else(|| PipelineError::Clustering(format!("k={}: no batches were fitted", k)))
    }
}

/// Label every row with its nearest centroid and total the squared distances.
fn nearest_centroids(observations: &Array2<f32>, centroids: &Array2<f32>) -> (Vec<ClusterLabel>, f64) {
    let mut inertia = 0.0f64;
    let labels = observations
        .outer_iter()
        .map(|row| {
            let (best, best_dist) = centroids
                .outer_iter()
                .map(|c| {
                    row.iter()
                        .zip(c.iter())
                        .map(|(a, b)| {
                            let d = f64::from(*a) - f64::from(*b);
                            d * d
                        })
                        .sum::<f64>()
                })
                .enumerate()
                .fold((0usize, f64::INFINITY), |acc, (i, d)| if d < acc.1 { (i, d) } else { acc });
            inertia += best_dist;
            ClusterLabel::from(best)
        })
        .collect();
    (labels, inertia)
}
