//! # Model
//!
//! Ties options, hyperparameters, the parameter store and its arena into
//! one object that can be trained, decoded and persisted as a directory.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use candle_core::Tensor;
use candle_nn::Optimizer;
use tracing::{info, warn};

use crate::config::ModelOptions;
use crate::crf::{CrfLoss, TransitionMask};
use crate::error::{Result, SegtagError};
use crate::gradcheck::{GradReport, GradientCheck};
use crate::graph::{FeatureRecord, GraphCapacity, Phase, SequenceGraph};
use crate::hyper::HyperParameters;
use crate::optim::{AdaGrad, AdaGradConfig, ParameterRegistry};
use crate::params::{ParamArena, ParameterStore};

/// Hyperparameter file inside a model directory.
pub const HYPER_FILE: &str = "hyper.txt";
/// Parameter checkpoint inside a model directory.
pub const MODEL_FILE: &str = "model.txt";
/// Options file inside a model directory.
pub const OPTIONS_FILE: &str = "options.json";

/// A segmentation model.
pub struct Model {
    pub options: ModelOptions,
    pub hyper: HyperParameters,
    pub store: ParameterStore,
    arena: ParamArena,
}

impl Model {
    /// Empty model; fill the store's tables, then call [`Model::initial`].
    pub fn new(options: ModelOptions) -> Result<Self> {
        Self::with_arena(options, ParamArena::new())
    }

    pub fn with_seed(options: ModelOptions, seed: u64) -> Result<Self> {
        Self::with_arena(options, ParamArena::with_seed(seed))
    }

    fn with_arena(options: ModelOptions, arena: ParamArena) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            hyper: HyperParameters::from_options(&options),
            store: ParameterStore::new(options.variant),
            options,
            arena,
        })
    }

    /// Arena for allocating embedding tables before initialisation.
    pub fn arena_mut(&mut self) -> &mut ParamArena {
        &mut self.arena
    }

    pub fn arena(&self) -> &ParamArena {
        &self.arena
    }

    /// Derive hyperparameters and allocate every weight block.
    pub fn initial(&mut self) -> Result<()> {
        self.hyper.set_required(&self.options);
        self.store.initial(&mut self.hyper, &mut self.arena)
    }

    pub fn capacity(&self) -> GraphCapacity {
        GraphCapacity {
            max_sentence_length: self.options.max_sentence_length,
            max_char_length: self.options.max_char_length,
        }
    }

    /// Graph over this model's weights, sized to the configured caps.
    pub fn graph(&self) -> Result<SequenceGraph<'_>> {
        SequenceGraph::initial(&self.store, &self.hyper, self.capacity())
    }

    pub fn crf(&self) -> Result<&CrfLoss> {
        self.store.loss.as_ref().ok_or(SegtagError::Unallocated("crf"))
    }

    /// Training loss of one labelled sentence.
    pub fn loss(
        &self,
        graph: &mut SequenceGraph<'_>,
        features: &[FeatureRecord],
        gold: &[usize],
    ) -> Result<Tensor> {
        let scores = graph.forward(features, Phase::Train)?;
        self.crf()?.loss(&scores, gold)
    }

    /// Best label ids. Segmentation label sets decode under tag constraints.
    pub fn decode(
        &self,
        graph: &mut SequenceGraph<'_>,
        features: &[FeatureRecord],
    ) -> Result<Vec<usize>> {
        let scores = graph.forward(features, Phase::Decode)?;
        let mask = TransitionMask::from_labels(&self.store.label_alpha);
        self.crf()?.decode(&scores, mask.as_ref())
    }

    /// Best label strings.
    pub fn decode_labels(
        &self,
        graph: &mut SequenceGraph<'_>,
        features: &[FeatureRecord],
    ) -> Result<Vec<String>> {
        self.decode(graph, features)?
            .into_iter()
            .map(|id| {
                self.store
                    .label_alpha
                    .get(id as u32)
                    .map(str::to_string)
                    .ok_or_else(|| SegtagError::InvalidLabels(format!("no label with id {id}")))
            })
            .collect()
    }

    /// Per-token label posteriors.
    pub fn marginals(
        &self,
        graph: &mut SequenceGraph<'_>,
        features: &[FeatureRecord],
    ) -> Result<Vec<Vec<f32>>> {
        let scores = graph.forward(features, Phase::Decode)?;
        self.crf()?.marginals(&scores)
    }

    /// AdaGrad over every block of the store.
    pub fn optimizer(&self) -> Result<AdaGrad> {
        let mut registry = ParameterRegistry::new();
        self.store.export_parameters(&mut registry);
        info!(
            blocks = registry.len(),
            weights = registry.weight_count(),
            "optimizer ready"
        );
        registry.into_optimizer(AdaGradConfig {
            alpha: self.hyper.ada_alpha,
            eps: self.hyper.ada_eps,
            regularization: self.hyper.regularization,
        })
    }

    /// One forward/backward/update on a labelled sentence; returns the loss.
    pub fn train_step(
        &self,
        graph: &mut SequenceGraph<'_>,
        optimizer: &mut AdaGrad,
        features: &[FeatureRecord],
        gold: &[usize],
    ) -> Result<f32> {
        let loss = self.loss(graph, features, gold)?;
        optimizer.backward_step(&loss)?;
        Ok(loss.to_scalar::<f32>()?)
    }

    /// Compare analytic and numeric gradients of the summed decode-mode loss
    /// over labelled sentences.
    pub fn gradient_check(
        &self,
        sentences: &[(Vec<FeatureRecord>, Vec<usize>)],
        seed: u64,
    ) -> Result<GradReport> {
        let mut check = GradientCheck::new(seed);
        self.store.export_grad_check(&mut check);
        let crf = self.crf()?;
        let mut graph = self.graph()?;
        check.check(|| {
            let mut total: Option<Tensor> = None;
            for (features, gold) in sentences {
                let scores = graph.forward(features, Phase::Decode)?;
                let loss = crf.loss(&scores, gold)?;
                total = Some(match total {
                    Some(sum) => (sum + loss)?,
                    None => loss,
                });
            }
            total.ok_or_else(|| SegtagError::InvalidLabels("no sentences to check".into()))
        })
    }

    /// Write `hyper.txt`, `model.txt` and `options.json` into `dir`.
    pub fn save_dir<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        self.hyper.ensure_derived()?;
        fs::create_dir_all(dir)?;
        self.hyper
            .save(BufWriter::new(File::create(dir.join(HYPER_FILE))?))?;
        self.store
            .save(BufWriter::new(File::create(dir.join(MODEL_FILE))?))?;
        let options = serde_json::to_string_pretty(&self.options)
            .map_err(|e| SegtagError::Config(format!("failed to encode options: {e}")))?;
        fs::write(dir.join(OPTIONS_FILE), options)?;
        info!(dir = %dir.display(), "model saved");
        Ok(())
    }

    /// Read a directory written by [`Model::save_dir`].
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let hyper = HyperParameters::load(BufReader::new(File::open(dir.join(HYPER_FILE))?))?;
        let mut arena = ParamArena::new();
        let store = ParameterStore::load(
            BufReader::new(File::open(dir.join(MODEL_FILE))?),
            &mut arena,
        )?;

        let options_path = dir.join(OPTIONS_FILE);
        let options = if options_path.exists() {
            ModelOptions::from_json_file(&options_path)?
        } else {
            warn!(dir = %dir.display(), "no options file, using defaults");
            ModelOptions::new().with_variant(store.variant)
        };
        if options.variant != store.variant {
            return Err(SegtagError::Config(format!(
                "options describe a {} model, checkpoint holds {}",
                options.variant, store.variant
            )));
        }

        info!(dir = %dir.display(), variant = %store.variant, "model loaded");
        Ok(Self {
            options,
            hyper,
            store,
            arena,
        })
    }
}
