use std::path::{Path, PathBuf};

use derive_more::{Display, From, Into, IntoIterator};
use ndarray::prelude::*;
use rust_bert::pipelines::sentence_embeddings::{self, SentenceEmbeddingsBuilder, SentenceEmbeddingsModel};
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};
use tch::Device;
use tracing::{debug, info};

use crate::display::progress::ProgressObserver;
use crate::error::{PipelineError, Result, Stage};

/// Maps a batch of cleaned strings to one fixed-dimension vector each,
/// in input order.
pub trait EmbeddingProvider {
    /// Human-readable name of the model, for logs and error messages.
    fn name(&self) -> String;

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Resolves a [`ModelReference`] into a ready provider.
pub trait ModelLoader {
    fn load(&self, reference: &ModelReference) -> Result<Box<dyn EmbeddingProvider>>;
}

/// Where the sentence-embedding model comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ModelReference {
    /// A directory holding converted model files (`config.json`,
    /// `rust_model.ot`, tokenizer files).
    #[display("{}", _0.display())]
    Path(PathBuf),

    /// A named model fetched by rust-bert into its own cache.
    #[display("{}", _0)]
    Pretrained(SentenceEmbeddingsModelType),
}

impl Default for ModelReference {
    fn default() -> Self {
        Self::Path(PathBuf::from("paraphrase-distilroberta-base-v1"))
    }
}

/// Generate embeddings for `texts`, `batch_size` strings per call to the
/// provider. An empty input returns an empty result without touching the
/// provider. The result doesn't depend on the batch size.
pub fn generate_embeddings(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    progress: &dyn ProgressObserver,
) -> Result<Embeddings> {
    if batch_size == 0 {
        return Err(PipelineError::invalid("embedding_batch_size", "must be at least 1"));
    }
    if texts.is_empty() {
        return Ok(Embeddings::default());
    }

    info!(model = %provider.name(), count = texts.len(), "generating embeddings");
    progress.start(texts.len(), "embedding tickets");
    let mut vectors = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(batch_size) {
        let batch = provider.encode(chunk)?;
        if batch.len() != chunk.len() {
            return Err(PipelineError::Embedding(format!(
                "{} returned {} vectors for {} texts",
                provider.name(),
                batch.len(),
                chunk.len()
            )));
        }
        vectors.extend(batch);
        progress.advance(chunk.len());
    }
    progress.finish();

    let embeddings = Embeddings::try_new(vectors)?;
    debug!(shape = %embeddings.shape(), "embeddings generated");
    Ok(embeddings)
}

// ========================================================================
// rust-bert backed provider

/// Loads sentence-embedding models through rust-bert, on the CPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustBertLoader;

impl ModelLoader for RustBertLoader {
    fn load(&self, reference: &ModelReference) -> Result<Box<dyn EmbeddingProvider>> {
        let model = match reference {
            ModelReference::Path(path) => load_local(path)?,
            ModelReference::Pretrained(model_type) => {
                info!(model = %model_type, "fetching pretrained embedding model");
                SentenceEmbeddingsBuilder::remote((*model_type).into())
                    .with_device(Device::Cpu)
                    .create_model()
                    .map_err(|e| PipelineError::ModelUnavailable {
                        model: model_type.to_string(),
                        reason: e.to_string(),
                    })?
            }
        };
        Ok(Box::new(RustBertEmbedder {
            name: reference.to_string(),
            model,
        }))
    }
}

fn load_local(path: &Path) -> Result<SentenceEmbeddingsModel> {
    let unavailable = |reason: String| PipelineError::ModelUnavailable {
        model: path.display().to_string(),
        reason,
    };
    if !path.is_dir() {
        return Err(unavailable(
            "model directory not found; check the model path in the configuration".into(),
        ));
    }
    info!(path = %path.display(), "loading embedding model");
    SentenceEmbeddingsBuilder::local(path)
        .with_device(Device::Cpu)
        .create_model()
        .map_err(|e| {
            unavailable(format!(
                "{e}; make sure the directory contains config.json, rust_model.ot and the tokenizer files"
            ))
        })
}

pub struct RustBertEmbedder {
    name: String,
    model: SentenceEmbeddingsModel,
}

impl EmbeddingProvider for RustBertEmbedder {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.model
            .encode(texts)
            .map_err(|e| PipelineError::Embedding(e.to_string()))
    }
}

// ========================================================================
// Types

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, From, Into, Display)]
#[display("{{ rows:{} columns:{} }}", self.0.0, self.0.1)]
pub struct Shape((usize, usize));

/// Newtype wrapper around Embeddings.
/// Wraps a [`Vec<Vec<f32>>`] whose rows all share one dimensionality.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoIterator, PartialEq)]
#[serde(transparent)]
pub struct Embeddings(Vec<Vec<f32>>);

impl Embeddings {
    /// Wrap `vectors`, rejecting an empty dimension or rows of differing length.
    pub fn try_new(vectors: Vec<Vec<f32>>) -> Result<Self> {
        if let Some(first) = vectors.first() {
            let dim = first.len();
            if dim == 0 {
                return Err(PipelineError::Embedding("zero-dimension vectors".into()));
            }
            if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
                return Err(PipelineError::Embedding(format!(
                    "vector {} has dimension {}, expected {}",
                    i,
                    v.len(),
                    dim
                )));
            }
        }
        Ok(Self(vectors))
    }

    /// The shape of this Embeddings instance.
    pub fn shape(&self) -> Shape {
        (self.len(), self.dim()).into()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dimensionality of every vector; 0 when empty.
    pub fn dim(&self) -> usize {
        self.0.first().map(Vec::len).unwrap_or_default()
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.0
    }

    /// Convert this Embeddings into an Array2 for the clustering backend.
    pub fn as_ndarray(&self) -> Result<Array2<f32>> {
        let shape = self.shape();
        let flattened = self.0.iter().flatten().copied().collect::<Vec<f32>>();
        Array2::from_shape_vec(shape.0, flattened).map_err(|e| {
            PipelineError::Embedding(format!("Embeddings::as_ndarray, shape: {}: {}", shape, e))
        })
    }

    /// Number of pairwise-distinct vectors, compared bit for bit.
    pub fn distinct_count(&self) -> usize {
        self.0
            .iter()
            .map(|v| v.iter().map(|x| x.to_bits()).collect::<Vec<u32>>())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    pub(crate) fn require_rows(&self, stage: Stage, needed: usize) -> Result<()> {
        if self.len() < needed {
            Err(PipelineError::insufficient(
                stage,
                format!("{} vectors available, at least {} needed", self.len(), needed),
            ))
        } else {
            Ok(())
        }
    }
}

/// Native enum that maps to a [`sentence_embeddings::SentenceEmbeddingsModelType`].
/// The foreign enum can't receive our derives, so this one mirrors it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    Default,
    IntoStaticStr,
    EnumString,
    Display,
)]
pub enum SentenceEmbeddingsModelType {
    DistiluseBaseMultilingualCased,
    BertBaseNliMeanTokens,
    AllMiniLmL12V2,
    #[default]
    AllMiniLmL6V2,
    AllDistilrobertaV1,
    ParaphraseAlbertSmallV2,
    SentenceT5Base,
}

impl From<SentenceEmbeddingsModelType> for sentence_embeddings::SentenceEmbeddingsModelType {
    fn from(val: SentenceEmbeddingsModelType) -> Self {
        use sentence_embeddings::SentenceEmbeddingsModelType as Foreign;
        match val {
            SentenceEmbeddingsModelType::DistiluseBaseMultilingualCased => {
                Foreign::DistiluseBaseMultilingualCased
            }
            SentenceEmbeddingsModelType::BertBaseNliMeanTokens => Foreign::BertBaseNliMeanTokens,
            SentenceEmbeddingsModelType::AllMiniLmL12V2 => Foreign::AllMiniLmL12V2,
            SentenceEmbeddingsModelType::AllMiniLmL6V2 => Foreign::AllMiniLmL6V2,
            SentenceEmbeddingsModelType::AllDistilrobertaV1 => Foreign::AllDistilrobertaV1,
            SentenceEmbeddingsModelType::ParaphraseAlbertSmallV2 => {
                Foreign::ParaphraseAlbertSmallV2
            }
            SentenceEmbeddingsModelType::SentenceT5Base => Foreign::SentenceT5Base,
        }
    }
}
