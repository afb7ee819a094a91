mod paths;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use paths::UserConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::grp::embeddings::ModelReference;
use crate::grp::io::Columns;
use crate::grp::kmeans::KMeansSettings;
use crate::grp::model::KRange;
use crate::grp::normalize::NormalizerRules;
use crate::grp::summary::SummarySettings;

/// `~/.config/grupos/config.toml`, whether or not it exists.
pub fn default_config_file() -> Result<PathBuf> {
    UserConfig::config_file()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub path: PathBuf,
    pub columns: Columns,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tickets.csv"),
            columns: Columns::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub reference: ModelReference,
    /// Texts per call to the embedding model.
    pub batch_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            reference: ModelReference::default(),
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElbowConfig {
    pub k_min: usize,
    pub k_max: usize,
}

impl Default for ElbowConfig {
    fn default() -> Self {
        Self { k_min: 2, k_max: 15 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Export files are named `<prefix>_<YYYYmmdd_HHMMSS>.csv`.
    pub prefix: String,
    pub chart: PathBuf,
    pub chart_width: u32,
    pub chart_height: u32,
}

impl OutputConfig {
    /// The chart path, under `dir` unless absolute.
    pub fn chart_path(&self) -> PathBuf {
        self.dir.join(&self.chart)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "clustered_tickets".into(),
            chart: PathBuf::from("elbow_plot.png"),
            chart_width: 1024,
            chart_height: 768,
        }
    }
}

/// Everything one run needs, passed explicitly to the pipeline driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input: InputConfig,
    pub model: ModelConfig,
    pub normalizer: NormalizerRules,
    pub elbow: ElbowConfig,
    pub clustering: KMeansSettings,
    pub summary: SummarySettings,
    pub output: OutputConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(body: &str) -> Result<Self> {
        toml::from_str(body).with_context(|| "PipelineConfig: parse TOML")
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(anyhow!(PipelineError::MissingInput {
                source_name: "config file".into(),
                missing: vec![path.display().to_string()],
            }));
        }
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("PipelineConfig: read {}", path.display()))?;
        Self::from_toml_str(&body).with_context(|| format!("PipelineConfig: {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).with_context(|| "PipelineConfig: serialize TOML")
    }

    /// An explicit path must exist. Without one, the user config file is
    /// used if present, else the defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            info!(path = %path.display(), "using config file");
            return Self::from_toml_file(path);
        }
        match default_config_file() {
            Ok(path) if path.is_file() => {
                info!(path = %path.display(), "using user config file");
                Self::from_toml_file(path)
            }
            Ok(_) | Err(_) => {
                debug!("no config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn k_range(&self) -> crate::error::Result<KRange> {
        KRange::try_new(self.elbow.k_min, self.elbow.k_max)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        self.k_range()?;
        self.clustering.validate()?;
        if self.model.batch_size == 0 {
            return Err(PipelineError::invalid("model.batch_size", "must be at least 1"));
        }
        if self.summary.excerpt_chars == 0 {
            return Err(PipelineError::invalid("summary.excerpt_chars", "must be at least 1"));
        }
        if self.output.chart_width == 0 || self.output.chart_height == 0 {
            return Err(PipelineError::invalid(
                "output.chart",
                format!(
                    "{}x{} is not a drawable size",
                    self.output.chart_width, self.output.chart_height
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::PipelineConfig;
    use crate::error::PipelineError;
    use crate::grp::embeddings::{ModelReference, SentenceEmbeddingsModelType};
    use crate::grp::kmeans::KMeansVariant;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.input.columns.id, "Number");
        assert_eq!(config.input.columns.notes, "Work notes");
        assert_eq!((config.elbow.k_min, config.elbow.k_max), (2, 15));
        assert_eq!(config.clustering.seed, 42);
        assert_eq!(config.clustering.restarts, 10);
        assert_eq!(*config.summary.sample_size, 3);
        assert_eq!(config.summary.excerpt_chars, 200);
        assert_eq!(config.output.chart, PathBuf::from("elbow_plot.png"));
        assert_eq!(config.output.prefix, "clustered_tickets");
    }

    #[test]
    fn test_chart_path() {
        let mut config = PipelineConfig::default();
        config.output.dir = PathBuf::from("out");
        assert_eq!(config.output.chart_path(), PathBuf::from("out/elbow_plot.png"));
        config.output.chart = PathBuf::from("/tmp/elbow.png");
        assert_eq!(config.output.chart_path(), PathBuf::from("/tmp/elbow.png"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [input]
            path = "data/task.csv"

            [input.columns]
            notes = "Comments and Work notes"

            [model]
            reference = { pretrained = "AllMiniLmL12V2" }

            [elbow]
            k_max = 8

            [clustering]
            variant = "incremental"
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.input.path, PathBuf::from("data/task.csv"));
        assert_eq!(config.input.columns.notes, "Comments and Work notes");
        assert_eq!(config.input.columns.description, "Description");
        assert_eq!(
            config.model.reference,
            ModelReference::Pretrained(SentenceEmbeddingsModelType::AllMiniLmL12V2)
        );
        assert_eq!(config.model.batch_size, 32);
        assert_eq!(config.k_range().unwrap().max().get(), 8);
        assert_eq!(config.clustering.variant, KMeansVariant::Incremental);
        assert_eq!(config.clustering.seed, 7);
        assert_eq!(config.clustering.restarts, 10);
    }

    #[test]
    fn test_written_config_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = PipelineConfig::default();
        config.elbow.k_max = 9;
        config.model.reference = ModelReference::Path("models/minilm".into());
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();
        assert_eq!(PipelineConfig::from_toml_file(&path).unwrap(), config);
        assert_eq!(PipelineConfig::resolve(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::resolve(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.elbow.k_min = 1;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.elbow.k_min = 9;
        config.elbow.k_max = 4;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.clustering.restarts = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.model.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidParameter { parameter: "model.batch_size", .. })
        ));

        assert!(PipelineConfig::from_toml_str("[summary]\nsample_size = 0\n").is_err());
    }
}
