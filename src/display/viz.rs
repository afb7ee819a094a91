use std::{ops::Range, path::PathBuf};

use anyhow::{Context, Result, anyhow};
use plotters::prelude::*;
use tracing::info;

use crate::error::{PipelineError, Stage};
use crate::grp::elbow::InertiaCurve;

/// Renders an inertia curve somewhere and says where.
pub trait CurvePlotter {
    fn plot(&mut self, curve: &InertiaCurve) -> Result<PathBuf>;
}

/// PNG line chart of inertia against k, written to a fixed path.
#[derive(Debug, Clone)]
pub struct ElbowChart {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub caption: String,
}

impl ElbowChart {
    pub fn new<P: Into<PathBuf>>(path: P, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            caption: "Elbow Method for Optimal k".into(),
        }
    }
}

impl CurvePlotter for ElbowChart {
    fn plot(&mut self, curve: &InertiaCurve) -> Result<PathBuf> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("ElbowChart: create {}", parent.display()))?;
        }
        plot_elbow_curve(
            curve,
            self.path.clone(),
            self.width,
            self.height,
            &self.caption,
        )
    }
}

/// Axis ranges for a curve: k on x (half-open, at least one step wide), and
/// inertia on y from zero with a little headroom.
fn chart_ranges(curve: &InertiaCurve) -> Option<(Range<u32>, Range<f64>)> {
    let first = curve.first()?;
    let last = curve.last()?;
    let lo = first.k.get() as u32;
    let hi = (last.k.get() as u32).max(lo + 1);
    let top = curve.iter().map(|p| p.inertia).fold(0.0_f64, f64::max);
    let top = if top > 0.0 { top * 1.05 } else { 1.0 };
    Some((lo..hi, 0.0..top))
}

/// Plot the elbow curve: one point per k, joined by a line.
///
/// Adapted from [plotters/examples/chart.rs](https://github.com/plotters-rs/plotters/blob/master/plotters/examples/chart.rs).
pub fn plot_elbow_curve(
    curve: &InertiaCurve,
    output_path: PathBuf,
    width: u32,
    height: u32,
    caption: &str,
) -> Result<PathBuf> {
    let (k_range, inertia_range) = chart_ranges(curve).ok_or_else(|| {
        anyhow!(PipelineError::insufficient(
            Stage::Elbow,
            "no points to plot"
        ))
    })?;

    // Scoped so the backend's borrow of output_path ends before returning.
    {
        let caption_style = FontDesc::from(("sans-serif", 32));
        let label_style = FontDesc::from(("sans-serif", 18));

        let root = BitMapBackend::new(&output_path, (width, height)).into_drawing_area();
        root.fill(&WHITE)
            .with_context(|| "elbow_curve: fill background")?;

        let mut ctx = ChartBuilder::on(&root)
            .caption(caption, caption_style)
            .x_label_area_size(60)
            .y_label_area_size(100)
            .margin(20)
            .build_cartesian_2d(k_range, inertia_range)
            .with_context(|| "elbow_curve: build_cartesian_2d")?;

        ctx.configure_mesh()
            .x_desc("Number of clusters (k)")
            .x_label_style(label_style.clone())
            .x_labels(curve.len())
            .y_desc("Inertia")
            .y_label_style(label_style)
            .y_label_formatter(&|y| format!("{:.1}", y))
            .draw()
            .with_context(|| "elbow_curve(): draw mesh")?;

        let points = curve
            .iter()
            .map(|p| (p.k.get() as u32, p.inertia))
            .collect::<Vec<_>>();
        ctx.draw_series(LineSeries::new(points.iter().copied(), &BLUE))
            .with_context(|| "elbow_curve(): draw line")?;
        ctx.draw_series(
            points
                .iter()
                .map(|(k, inertia)| Circle::new((*k, *inertia), 4, BLUE.filled())),
        )
        .with_context(|| "elbow_curve(): draw points")?;

        root.present()
            .with_context(|| format!("elbow_curve(): write {}", output_path.display()))?;
    }

    info!(path = %output_path.display(), "elbow chart saved");
    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::{chart_ranges, plot_elbow_curve};
    use crate::error::PipelineError;
    use crate::grp::elbow::{InertiaCurve, InertiaPoint};
    use crate::grp::model::ClusterCount;

    fn curve(points: &[(usize, f64)]) -> InertiaCurve {
        points
            .iter()
            .map(|&(k, inertia)| InertiaPoint {
                k: ClusterCount::try_new(k).unwrap(),
                inertia,
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn test_ranges() {
        let (k, inertia) = chart_ranges(&curve(&[(2, 100.0), (3, 40.0), (4, 35.0)])).unwrap();
        assert_eq!(k, 2..4);
        assert_eq!(inertia.start, 0.0);
        assert!((inertia.end - 105.0).abs() < 1e-9);

        let (k, inertia) = chart_ranges(&curve(&[(2, 0.0)])).unwrap();
        assert_eq!(k, 2..3);
        assert_eq!(inertia, 0.0..1.0);
    }

    #[test]
    fn test_empty_curve_is_not_plotted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elbow.png");
        let err = plot_elbow_curve(&InertiaCurve::default(), path.clone(), 640, 480, "x").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InsufficientData { .. })
        ));
        assert!(!path.exists());
    }
}
