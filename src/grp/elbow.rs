use std::fmt::Display;

use derive_more::{Deref, From, IntoIterator};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::embeddings::Embeddings;
use super::kmeans::ClusterAssigner;
use super::model::{ClusterCount, KRange};
use crate::display::progress::ProgressObserver;
use crate::error::{PipelineError, Result, Stage};

/// Inertia achieved at one candidate k.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InertiaPoint {
    pub k: ClusterCount,
    pub inertia: f64,
}

/// `(k, inertia)` for every k of a contiguous range, ascending in k.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Deref, From, IntoIterator)]
#[serde(transparent)]
pub struct InertiaCurve(#[into_iterator(owned, ref)] Vec<InertiaPoint>);

impl InertiaCurve {
    pub fn inertia_for(&self, k: usize) -> Option<f64> {
        self.0.iter().find(|p| p.k.get() == k).map(|p| p.inertia)
    }

    pub fn is_non_increasing(&self) -> bool {
        self.0.windows(2).all(|w| w[1].inertia <= w[0].inertia)
    }
}

impl Display for InertiaCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:>4}  {:>16}", "k", "inertia")?;
        for p in &self.0 {
            writeln!(f, "{:>4}  {:>16.4}", p.k, p.inertia)?;
        }
        Ok(())
    }
}

/// Elbow-method sweep: clusters the vectors once per candidate k and
/// records the inertia. Picking the elbow is left to whoever reads the curve.
#[derive(Debug, Clone)]
pub struct KSelector {
    assigner: ClusterAssigner,
    range: KRange,
}

impl KSelector {
    pub fn new(assigner: ClusterAssigner, range: KRange) -> Self {
        Self { assigner, range }
    }

    pub fn range(&self) -> KRange {
        self.range
    }

    /// Compute the inertia curve. Candidates above the number of distinct
    /// vectors are dropped; if not even `k_min` fits, that's an
    /// `InsufficientData` error.
    pub fn sweep(
        &self,
        embeddings: &Embeddings,
        progress: &dyn ProgressObserver,
    ) -> Result<InertiaCurve> {
        let distinct = embeddings.distinct_count();
        let range = self.range.clamp_to(distinct).ok_or_else(|| {
            PipelineError::insufficient(
                Stage::Elbow,
                format!(
                    "{} tickets ({} distinct) available, k_min is {}",
                    embeddings.len(),
                    distinct,
                    self.range.min()
                ),
            )
        })?;
        if range != self.range {
            warn!(
                requested = %self.range,
                used = %range,
                "k range truncated to the number of distinct tickets"
            );
        }

        info!(range = %range, restarts = self.assigner.settings().restarts, "calculating elbow curve");
        progress.start(range.len(), "testing cluster counts");
        let mut points = Vec::with_capacity(range.len());
        for k in range.iter() {
            let assignment = self.assigner.assign(embeddings, k)?;
            points.push(InertiaPoint {
                k,
                inertia: assignment.inertia,
            });
            progress.advance(1);
        }
        progress.finish();
        Ok(InertiaCurve(points))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::KSelector;
    use crate::display::progress::{NoProgress, tests::RecordingProgress};
    use crate::error::{PipelineError, Stage};
    use crate::grp::embeddings::Embeddings;
    use crate::grp::kmeans::{
        ClusterAssigner, KMeansSettings, KMeansVariant,
        tests::{blobs, spaced_blobs},
    };
    use crate::grp::model::KRange;

    fn selector(min: usize, max: usize) -> KSelector {
        KSelector::new(
            ClusterAssigner::new(KMeansSettings::default()).unwrap(),
            KRange::try_new(min, max).unwrap(),
        )
    }

    #[test]
    fn test_curve_covers_range_in_order() {
        let data = blobs(3, 4);
        let curve = selector(2, 6).sweep(&data, &NoProgress).unwrap();
        assert_eq!(
            curve.iter().map(|p| p.k.get()).collect::<Vec<_>>(),
            vec![2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn test_curve_is_reproducible() {
        let data = blobs(5, 10);
        let selector = selector(2, 15);
        let first = selector.sweep(&data, &NoProgress).unwrap();
        let second = selector.sweep(&data, &NoProgress).unwrap();
        let bits = |c: &super::InertiaCurve| c.iter().map(|p| p.inertia.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_inertia_non_increasing_on_separated_data() {
        let data = blobs(5, 10);
        let curve = selector(2, 12).sweep(&data, &NoProgress).unwrap();
        assert!(curve.is_non_increasing(), "{curve}");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_inertia_never_increases_with_k(
            clusters in 2usize..=5,
            per_cluster in 3usize..=8,
            spacing in 50.0f32..200.0,
            seed in any::<u64>(),
            incremental in any::<bool>(),
        ) {
            let variant = if incremental { KMeansVariant::Incremental } else { KMeansVariant::Full };
            let settings = KMeansSettings { seed, variant, ..KMeansSettings::default() };
            let selector = KSelector::new(
                ClusterAssigner::new(settings).unwrap(),
                KRange::try_new(2, clusters).unwrap(),
            );
            let curve = selector
                .sweep(&spaced_blobs(clusters, per_cluster, spacing), &NoProgress)
                .unwrap();
            prop_assert_eq!(curve.len(), clusters - 1);
            prop_assert!(curve.is_non_increasing(), "{:?}: {}", variant, curve);
        }
    }

    #[test]
    fn test_elbow_at_true_cluster_count() {
        let data = blobs(5, 10);
        assert_eq!(data.len(), 50);
        let curve = selector(2, 15).sweep(&data, &NoProgress).unwrap();
        assert_eq!(curve.len(), 14);

        let at = |k| curve.inertia_for(k).unwrap();
        // Merging two groups costs orders of magnitude more than splitting one.
        assert!(at(5) < 0.05 * at(4), "{curve}");
        let drop_into_five = at(4) - at(5);
        let drop_after_five = at(5) - at(6);
        assert!(drop_into_five > 10.0 * drop_after_five, "{curve}");
    }

    #[test]
    fn test_range_truncated_to_vector_count() {
        let data = blobs(2, 3);
        let curve = selector(2, 15).sweep(&data, &NoProgress).unwrap();
        assert_eq!(curve.last().map(|p| p.k.get()), Some(6));
    }

    #[test]
    fn test_range_truncated_to_distinct_vectors() {
        let mut rows = blobs(2, 2).rows().to_vec();
        rows.extend(rows.clone());
        let data = Embeddings::try_new(rows).unwrap();
        let curve = selector(2, 15).sweep(&data, &NoProgress).unwrap();
        assert_eq!(curve.last().map(|p| p.k.get()), Some(4));
    }

    #[test]
    fn test_too_few_vectors_fails() {
        let data = Embeddings::try_new(vec![vec![0.0, 1.0]]).unwrap();
        match selector(2, 15).sweep(&data, &NoProgress) {
            Err(PipelineError::InsufficientData { stage, .. }) => assert_eq!(stage, Stage::Elbow),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(selector(3, 5).sweep(&blobs(1, 2), &NoProgress).is_err());
    }

    #[test]
    fn test_progress_counts_candidates() {
        let progress = RecordingProgress::default();
        selector(2, 4).sweep(&blobs(2, 4), &progress).unwrap();
        assert_eq!(progress.started.borrow()[0].0, 3);
        assert_eq!(progress.advanced.borrow().len(), 3);
    }
}
