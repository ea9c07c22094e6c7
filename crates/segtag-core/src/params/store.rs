//! # Parameter Store
//!
//! Owns every learnable block of a model together with the alphabets that
//! key them. Embedding tables and alphabets are filled in by the caller;
//! [`ParameterStore::initial`] then derives the remaining hyperparameters
//! from the table shapes and allocates the projection, recurrent, sparse and
//! CRF blocks from the model's [`ParamArena`].

use std::io::{BufRead, Write};

use candle_core::Var;
use tracing::{debug, info};

use crate::alphabet::Alphabet;
use crate::checkpoint::{CheckpointReader, CheckpointWriter, CHECKPOINT_KIND, CHECKPOINT_VERSION};
use crate::config::ModelVariant;
use crate::crf::CrfLoss;
use crate::error::{Result, SegtagError};
use crate::gradcheck::GradCheckSink;
use crate::hyper::{HyperParameters, ParameterShapes};
use crate::optim::ParameterSink;
use crate::params::{
    write_opt_var, Activation, BiProjection, LookupTable, ParamArena, Projection,
    RecurrentParams, SparseParams,
};

const LEFT_RNN: &str = "left-rnn";
const RIGHT_RNN: &str = "right-rnn";
const INPUT_PROJECTION: &str = "input-projection";
const FUSION_PROJECTION: &str = "fusion-projection";
const HIDDEN_PROJECTION: &str = "hidden-projection";
const LINEAR_OUTPUT: &str = "linear-output";
const SPARSE_TABLE: &str = "sparse-table";

/// Blocks of the dense pipeline: window projection, the two recurrent
/// directions, their fusion, a hidden layer and the linear output.
#[derive(Debug, Clone)]
pub struct DenseParams {
    /// `tanh`, `hidden x input`.
    pub input_projection: Projection,
    pub left_rnn: RecurrentParams,
    pub right_rnn: RecurrentParams,
    /// `tanh`, merges `rnn_hidden + rnn_hidden` into `hidden`.
    pub fusion_projection: BiProjection,
    /// `tanh`, `hidden x hidden`.
    pub hidden_projection: Projection,
    /// Linear, `labels x hidden`, no bias.
    pub output_layer: Projection,
}

impl DenseParams {
    /// Allocate every block at the shapes implied by derived hyperparameters.
    pub fn allocate(arena: &mut ParamArena, hyper: &HyperParameters) -> Result<Self> {
        hyper.ensure_derived()?;
        let hidden = hyper.hidden_size;
        let rnn = hyper.rnn_hidden_size;
        Ok(Self {
            input_projection: Projection::allocate(
                arena,
                INPUT_PROJECTION,
                hidden,
                hyper.input_size,
                true,
                Activation::Tanh,
            )?,
            left_rnn: RecurrentParams::allocate(arena, LEFT_RNN, rnn, hidden)?,
            right_rnn: RecurrentParams::allocate(arena, RIGHT_RNN, rnn, hidden)?,
            fusion_projection: BiProjection::allocate(arena, FUSION_PROJECTION, hidden, rnn, rnn)?,
            hidden_projection: Projection::allocate(
                arena,
                HIDDEN_PROJECTION,
                hidden,
                hidden,
                true,
                Activation::Tanh,
            )?,
            output_layer: Projection::allocate(
                arena,
                LINEAR_OUTPUT,
                hyper.label_size,
                hidden,
                false,
                Activation::Identity,
            )?,
        })
    }

    /// Every block with its qualified name.
    pub fn named_vars(&self) -> Vec<(String, &Var)> {
        fn qualify<'a>(prefix: &str, vars: Vec<(&'static str, &'a Var)>) -> Vec<(String, &'a Var)> {
            vars.into_iter()
                .map(|(suffix, var)| (format!("{prefix}.{suffix}"), var))
                .collect()
        }
        let mut vars = qualify(INPUT_PROJECTION, self.input_projection.vars());
        vars.extend(qualify(LEFT_RNN, self.left_rnn.vars()));
        vars.extend(qualify(RIGHT_RNN, self.right_rnn.vars()));
        vars.extend(qualify(FUSION_PROJECTION, self.fusion_projection.vars()));
        vars.extend(qualify(HIDDEN_PROJECTION, self.hidden_projection.vars()));
        vars.extend(qualify(LINEAR_OUTPUT, self.output_layer.vars()));
        vars
    }

    pub fn save<W: Write>(&self, w: &mut CheckpointWriter<W>) -> Result<()> {
        self.left_rnn.save(w, LEFT_RNN)?;
        self.right_rnn.save(w, RIGHT_RNN)?;
        self.input_projection.save(w, INPUT_PROJECTION)?;
        self.fusion_projection.save(w, FUSION_PROJECTION)?;
        self.hidden_projection.save(w, HIDDEN_PROJECTION)?;
        self.output_layer.save(w, LINEAR_OUTPUT)
    }

    pub fn save_absent<W: Write>(w: &mut CheckpointWriter<W>) -> Result<()> {
        RecurrentParams::save_absent(w, LEFT_RNN)?;
        RecurrentParams::save_absent(w, RIGHT_RNN)?;
        Projection::save_absent(w, INPUT_PROJECTION)?;
        BiProjection::save_absent(w, FUSION_PROJECTION)?;
        Projection::save_absent(w, HIDDEN_PROJECTION)?;
        Projection::save_absent(w, LINEAR_OUTPUT)
    }

    /// Read the sections written by [`DenseParams::save`]. Either every block
    /// is present or none is.
    pub fn load<R: BufRead>(
        r: &mut CheckpointReader<R>,
        arena: &mut ParamArena,
    ) -> Result<Option<Self>> {
        let left_rnn = RecurrentParams::load(r, arena, LEFT_RNN, LEFT_RNN)?;
        let right_rnn = RecurrentParams::load(r, arena, RIGHT_RNN, RIGHT_RNN)?;
        let input_projection =
            Projection::load(r, arena, INPUT_PROJECTION, INPUT_PROJECTION, Activation::Tanh)?;
        let fusion_projection = BiProjection::load(r, arena, FUSION_PROJECTION, FUSION_PROJECTION)?;
        let hidden_projection =
            Projection::load(r, arena, HIDDEN_PROJECTION, HIDDEN_PROJECTION, Activation::Tanh)?;
        let output_layer =
            Projection::load(r, arena, LINEAR_OUTPUT, LINEAR_OUTPUT, Activation::Identity)?;

        match (
            left_rnn,
            right_rnn,
            input_projection,
            fusion_projection,
            hidden_projection,
            output_layer,
        ) {
            (
                Some(left_rnn),
                Some(right_rnn),
                Some(input_projection),
                Some(fusion_projection),
                Some(hidden_projection),
                Some(output_layer),
            ) => Ok(Some(Self {
                input_projection,
                left_rnn,
                right_rnn,
                fusion_projection,
                hidden_projection,
                output_layer,
            })),
            (None, None, None, None, None, None) => Ok(None),
            _ => Err(SegtagError::Checkpoint(
                "dense blocks are only partially present".into(),
            )),
        }
    }
}

/// Exclusive owner of a model's alphabets and weight blocks.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    pub variant: ModelVariant,
    pub word_alpha: Alphabet,
    pub words: Option<LookupTable>,
    pub char_alpha: Alphabet,
    pub chars: Option<LookupTable>,
    pub type_alphas: Vec<Alphabet>,
    pub types: Vec<LookupTable>,
    pub dense: Option<DenseParams>,
    pub sparse_alpha: Alphabet,
    pub sparse: Option<SparseParams>,
    pub label_alpha: Alphabet,
    pub loss: Option<CrfLoss>,
}

/// Fail with [`SegtagError::MissingVocabulary`] unless both the alphabet and
/// its table have rows, and they agree on the vocabulary size.
fn check_table(table_name: &str, alpha: &Alphabet, table: Option<&LookupTable>) -> Result<usize> {
    let missing = || SegtagError::MissingVocabulary {
        table: table_name.to_string(),
    };
    let table = table.ok_or_else(missing)?;
    if alpha.is_empty() || table.is_empty() {
        return Err(missing());
    }
    if alpha.len() != table.vocab_size() {
        return Err(SegtagError::Config(format!(
            "{table_name}: alphabet has {} entries, table has {} rows",
            alpha.len(),
            table.vocab_size()
        )));
    }
    Ok(table.dim())
}

impl ParameterStore {
    /// Empty store for a variant; tables are filled in by the caller.
    pub fn new(variant: ModelVariant) -> Self {
        Self {
            variant,
            word_alpha: Alphabet::new(),
            words: None,
            char_alpha: Alphabet::new(),
            chars: None,
            type_alphas: Vec::new(),
            types: Vec::new(),
            dense: None,
            sparse_alpha: Alphabet::new(),
            sparse: None,
            label_alpha: Alphabet::new(),
            loss: None,
        }
    }

    pub fn set_words(&mut self, alpha: Alphabet, table: LookupTable) {
        self.word_alpha = alpha;
        self.words = Some(table);
    }

    pub fn set_chars(&mut self, alpha: Alphabet, table: LookupTable) {
        self.char_alpha = alpha;
        self.chars = Some(table);
    }

    /// Append one discrete type vocabulary; returns its slot.
    pub fn add_type(&mut self, alpha: Alphabet, table: LookupTable) -> usize {
        self.type_alphas.push(alpha);
        self.types.push(table);
        self.types.len() - 1
    }

    pub fn set_sparse_alphabet(&mut self, alpha: Alphabet) {
        self.sparse_alpha = alpha;
    }

    pub fn set_labels(&mut self, alpha: Alphabet) {
        self.label_alpha = alpha;
    }

    pub fn label_count(&self) -> usize {
        self.label_alpha.len()
    }

    /// Check the externally loaded tables and report their shapes.
    pub fn shapes(&self) -> Result<ParameterShapes> {
        if self.label_alpha.is_empty() {
            return Err(SegtagError::MissingVocabulary {
                table: "labels".into(),
            });
        }
        let mut shapes = ParameterShapes {
            label_count: self.label_alpha.len(),
            pool_chars: self.variant.has_chars(),
            ..ParameterShapes::default()
        };
        if !self.variant.has_dense() {
            return Ok(shapes);
        }

        shapes.word_dim = check_table("words", &self.word_alpha, self.words.as_ref())?;
        if self.type_alphas.len() != self.types.len() {
            return Err(SegtagError::Config(format!(
                "{} type alphabets but {} type tables",
                self.type_alphas.len(),
                self.types.len()
            )));
        }
        for (k, (alpha, table)) in self.type_alphas.iter().zip(&self.types).enumerate() {
            shapes
                .type_dims
                .push(check_table(&format!("types[{k}]"), alpha, Some(table))?);
        }
        if self.variant.has_chars() {
            shapes.char_dim = check_table("chars", &self.char_alpha, self.chars.as_ref())?;
        }
        Ok(shapes)
    }

    /// Derive `hyper` from the table shapes and allocate every block the
    /// variant needs.
    pub fn initial(&mut self, hyper: &mut HyperParameters, arena: &mut ParamArena) -> Result<()> {
        let shapes = self.shapes()?;
        hyper.derive_from(&shapes);

        self.dense = if self.variant.has_dense() {
            Some(DenseParams::allocate(arena, hyper)?)
        } else {
            None
        };
        self.sparse = if self.variant.has_sparse() {
            Some(self.allocate_sparse(arena, hyper.label_size)?)
        } else {
            None
        };
        self.loss = Some(CrfLoss::initial(arena, hyper.label_size)?);

        info!(
            variant = %self.variant,
            unit_size = hyper.unit_size,
            input_size = hyper.input_size,
            labels = hyper.label_size,
            blocks = arena.len(),
            "parameter store initialised"
        );
        Ok(())
    }

    /// Reduced initialisation: derive the word-level widths and the label
    /// count, allocate only the sparse table. A CRF layer is created if the
    /// store has none yet.
    pub fn direct_initial(
        &mut self,
        hyper: &mut HyperParameters,
        arena: &mut ParamArena,
    ) -> Result<()> {
        let shapes = ParameterShapes {
            pool_chars: false,
            ..self.shapes()?
        };
        hyper.derive_from(&shapes);
        self.sparse = Some(self.allocate_sparse(arena, hyper.label_size)?);
        if self.loss.is_none() {
            self.loss = Some(CrfLoss::initial(arena, hyper.label_size)?);
        }
        debug!(
            features = self.sparse_alpha.len(),
            labels = hyper.label_size,
            "sparse-only initialisation"
        );
        Ok(())
    }

    fn allocate_sparse(&self, arena: &mut ParamArena, labels: usize) -> Result<SparseParams> {
        SparseParams::allocate(arena, "sparse", self.sparse_alpha.len(), labels)
    }

    /// Register every owned block with an optimizer sink.
    pub fn export_parameters<S: ParameterSink>(&self, sink: &mut S) {
        if let Some(words) = &self.words {
            sink.register("words.E", &words.embeddings);
        }
        if let Some(chars) = &self.chars {
            sink.register("chars.E", &chars.embeddings);
        }
        for (k, table) in self.types.iter().enumerate() {
            sink.register(&format!("types[{k}].E"), &table.embeddings);
        }
        if let Some(dense) = &self.dense {
            for (name, var) in dense.named_vars() {
                sink.register(&name, var);
            }
        }
        if let Some(sparse) = &self.sparse {
            sink.register("sparse.W", &sparse.weights);
            sink.register("sparse.b", &sparse.bias);
        }
        if let Some(loss) = &self.loss {
            sink.register("crf.T", &loss.transitions);
        }
    }

    /// Register representative blocks for numeric gradient verification.
    pub fn export_grad_check<S: GradCheckSink>(&self, sink: &mut S) {
        if let Some(words) = &self.words {
            sink.add("words.E", &words.embeddings);
        }
        for (k, table) in self.types.iter().enumerate() {
            sink.add(&format!("types[{k}].E"), &table.embeddings);
        }
        match &self.dense {
            Some(dense) => {
                for (name, var) in dense.named_vars() {
                    if !name.starts_with(LEFT_RNN) && !name.starts_with(RIGHT_RNN) {
                        sink.add(&name, var);
                    }
                }
            }
            None => {
                if let Some(sparse) = &self.sparse {
                    sink.add("sparse.W", &sparse.weights);
                }
            }
        }
        if let Some(loss) = &self.loss {
            sink.add("crf.T", &loss.transitions);
        }
    }

    /// Write every alphabet and block in checkpoint order.
    pub fn save<W: Write>(&self, out: W) -> Result<W> {
        let mut w = CheckpointWriter::new(out);
        w.header(CHECKPOINT_KIND, CHECKPOINT_VERSION)?;
        w.scalar("variant", self.variant)?;

        self.word_alpha.write(&mut w, "word-alphabet")?;
        write_opt_var(&mut w, "word-table", self.words.as_ref().map(|t| &t.embeddings))?;
        self.char_alpha.write(&mut w, "char-alphabet")?;
        write_opt_var(&mut w, "char-table", self.chars.as_ref().map(|t| &t.embeddings))?;

        w.scalar("type-alphabet-count", self.type_alphas.len())?;
        for (k, alpha) in self.type_alphas.iter().enumerate() {
            alpha.write(&mut w, &format!("type-alphabet-{k}"))?;
        }
        w.scalar("type-table-count", self.types.len())?;
        for (k, table) in self.types.iter().enumerate() {
            table.save(&mut w, &format!("type-table-{k}"))?;
        }

        match &self.dense {
            Some(dense) => dense.save(&mut w)?,
            None => DenseParams::save_absent(&mut w)?,
        }

        self.sparse_alpha.write(&mut w, "sparse-alphabet")?;
        match &self.sparse {
            Some(sparse) => sparse.save(&mut w, SPARSE_TABLE)?,
            None => SparseParams::save_absent(&mut w, SPARSE_TABLE)?,
        }

        self.label_alpha.write(&mut w, "label-alphabet")?;
        CrfLoss::save(self.loss.as_ref(), &mut w)?;

        debug!(variant = %self.variant, "parameter store saved");
        w.finish()
    }

    /// Rebuild a store from a checkpoint, re-registering every block in `arena`.
    pub fn load<R: BufRead>(input: R, arena: &mut ParamArena) -> Result<Self> {
        let mut r = CheckpointReader::new(input);
        r.header(CHECKPOINT_KIND, CHECKPOINT_VERSION)?;
        let variant: ModelVariant = r.scalar("variant")?;
        let mut store = Self::new(variant);

        store.word_alpha = Alphabet::read(&mut r, "word-alphabet")?;
        store.words = LookupTable::load(&mut r, arena, "word-table", "words")?;
        store.char_alpha = Alphabet::read(&mut r, "char-alphabet")?;
        store.chars = LookupTable::load(&mut r, arena, "char-table", "chars")?;

        let type_alphabets: usize = r.scalar("type-alphabet-count")?;
        for k in 0..type_alphabets {
            store
                .type_alphas
                .push(Alphabet::read(&mut r, &format!("type-alphabet-{k}"))?);
        }
        let type_tables: usize = r.scalar("type-table-count")?;
        for k in 0..type_tables {
            let section = format!("type-table-{k}");
            let table = LookupTable::load(&mut r, arena, &section, &format!("types[{k}]"))?
                .ok_or_else(|| SegtagError::Checkpoint(format!("{section} is absent")))?;
            store.types.push(table);
        }

        store.dense = DenseParams::load(&mut r, arena)?;
        store.sparse_alpha = Alphabet::read(&mut r, "sparse-alphabet")?;
        store.sparse = SparseParams::load(&mut r, arena, SPARSE_TABLE, "sparse")?;
        store.label_alpha = Alphabet::read(&mut r, "label-alphabet")?;
        store.loss = CrfLoss::load(&mut r, arena)?;

        info!(
            variant = %store.variant,
            words = store.word_alpha.len(),
            labels = store.label_alpha.len(),
            blocks = arena.len(),
            "parameter store loaded"
        );
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelOptions;
    use crate::optim::ParameterRegistry;

    struct Labels(Vec<String>);

    impl GradCheckSink for Labels {
        fn add(&mut self, label: &str, _var: &Var) {
            self.0.push(label.to_string());
        }
    }

    fn store_for(variant: ModelVariant, arena: &mut ParamArena) -> ParameterStore {
        let mut store = ParameterStore::new(variant);
        store.set_labels(Alphabet::from_entries(["b", "m", "e", "s"]));
        store.set_sparse_alphabet(Alphabet::from_entries(["f0", "f1", "f2"]));
        if variant.has_dense() {
            let words = Alphabet::from_entries(["-unknown-", "上", "海"]);
            let table = LookupTable::random(arena, "words", words.len(), 4).unwrap();
            store.set_words(words, table);
            let types = Alphabet::from_entries(["digit", "han"]);
            let table = LookupTable::random(arena, "types[0]", types.len(), 2).unwrap();
            store.add_type(types, table);
        }
        if variant.has_chars() {
            let chars = Alphabet::from_entries(["-unknown-", "a", "b"]);
            let table = LookupTable::random(arena, "chars", chars.len(), 3).unwrap();
            store.set_chars(chars, table);
        }
        store
    }

    fn hyper() -> HyperParameters {
        HyperParameters::from_options(
            &ModelOptions::new()
                .with_word_context(1)
                .with_hidden_sizes(5, 3),
        )
    }

    fn values(var: &Var) -> Vec<f32> {
        var.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_missing_labels_is_reported() {
        let mut arena = ParamArena::new();
        let mut store = store_for(ModelVariant::Neural, &mut arena);
        store.set_labels(Alphabet::new());
        let mut hyper = hyper();
        let err = store.initial(&mut hyper, &mut arena).unwrap_err();
        assert!(matches!(err, SegtagError::MissingVocabulary { ref table } if table == "labels"));
        assert!(!hyper.is_valid());
    }

    #[test]
    fn test_missing_word_table_is_reported() {
        let mut arena = ParamArena::new();
        let mut store = ParameterStore::new(ModelVariant::Neural);
        store.set_labels(Alphabet::from_entries(["b", "e"]));
        let err = store.initial(&mut hyper(), &mut arena).unwrap_err();
        assert!(matches!(err, SegtagError::MissingVocabulary { ref table } if table == "words"));
    }

    #[test]
    fn test_empty_type_table_is_reported() {
        let mut arena = ParamArena::new();
        let mut store = store_for(ModelVariant::Neural, &mut arena);
        let empty = LookupTable::from_rows(&mut arena, "types[1]", &[]).unwrap();
        store.add_type(Alphabet::new(), empty);
        let err = store.shapes().unwrap_err();
        assert!(matches!(err, SegtagError::MissingVocabulary { ref table } if table == "types[1]"));
    }

    #[test]
    fn test_initial_derives_widths_and_shapes() {
        let mut arena = ParamArena::new();
        let mut store = store_for(ModelVariant::CharNeural, &mut arena);
        let mut hyper = hyper();
        store.initial(&mut hyper, &mut arena).unwrap();

        assert!(hyper.is_valid());
        assert_eq!(hyper.word_window, 3);
        assert_eq!(hyper.unit_size, 4 + 2 + 3 * 3);
        assert_eq!(hyper.input_size, 3 * hyper.unit_size);
        assert_eq!(hyper.label_size, 4);

        let dense = store.dense.as_ref().unwrap();
        assert_eq!(dense.input_projection.weight.dims(), &[5, hyper.input_size]);
        assert_eq!(dense.left_rnn.weight_input.dims(), &[12, 5]);
        assert_eq!(dense.fusion_projection.weight_left.dims(), &[5, 3]);
        assert_eq!(dense.output_layer.weight.dims(), &[4, 5]);
        assert!(dense.output_layer.bias.is_none());
        assert!(store.sparse.is_none());
        assert_eq!(store.loss.as_ref().unwrap().label_count, 4);
    }

    #[test]
    fn test_rederiving_is_idempotent() {
        let mut arena = ParamArena::new();
        let mut store = store_for(ModelVariant::CharSparse, &mut arena);
        let mut first = hyper();
        store.initial(&mut first, &mut arena).unwrap();
        let blocks = arena.len();
        let mut second = hyper();
        store.initial(&mut second, &mut arena).unwrap();
        assert_eq!(first, second);
        assert_eq!(arena.len(), blocks);
    }

    #[test]
    fn test_direct_initial_only_allocates_sparse() {
        let mut arena = ParamArena::new();
        let mut store = store_for(ModelVariant::CharSparse, &mut arena);
        let mut hyper = hyper();
        store.direct_initial(&mut hyper, &mut arena).unwrap();
        assert!(store.dense.is_none());
        assert_eq!(store.sparse.as_ref().unwrap().weights.dims(), &[3, 4]);
        assert_eq!(hyper.unit_size, 4 + 2);
        assert!(store.loss.is_some());
    }

    #[test]
    fn test_sparse_variant_needs_only_labels() {
        let mut arena = ParamArena::new();
        let mut store = ParameterStore::new(ModelVariant::Sparse);
        store.set_labels(Alphabet::from_entries(["b", "e"]));
        let mut hyper = hyper();
        store.initial(&mut hyper, &mut arena).unwrap();
        assert_eq!(hyper.label_size, 2);
        assert_eq!(store.sparse.as_ref().unwrap().feature_count(), 0);
    }

    #[test]
    fn test_export_parameters_is_exhaustive() {
        for &variant in ModelVariant::all() {
            let mut arena = ParamArena::new();
            let mut store = store_for(variant, &mut arena);
            store.initial(&mut hyper(), &mut arena).unwrap();

            let mut registry = ParameterRegistry::new();
            store.export_parameters(&mut registry);
            assert_eq!(registry.len(), arena.len(), "{variant}");
        }
    }

    #[test]
    fn test_grad_check_subset() {
        let mut arena = ParamArena::new();
        let mut store = store_for(ModelVariant::CharNeural, &mut arena);
        store.initial(&mut hyper(), &mut arena).unwrap();
        let mut labels = Labels(Vec::new());
        store.export_grad_check(&mut labels);
        assert_eq!(
            labels.0,
            vec![
                "words.E",
                "types[0].E",
                "input-projection.W",
                "input-projection.b",
                "fusion-projection.W1",
                "fusion-projection.W2",
                "fusion-projection.b",
                "hidden-projection.W",
                "hidden-projection.b",
                "linear-output.W",
                "crf.T",
            ]
        );
    }

    #[test]
    fn test_checkpoint_roundtrip_every_variant() {
        for &variant in ModelVariant::all() {
            let mut arena = ParamArena::new();
            let mut store = store_for(variant, &mut arena);
            store.initial(&mut hyper(), &mut arena).unwrap();

            let bytes = store.save(Vec::new()).unwrap();
            let mut fresh = ParamArena::new();
            let loaded = ParameterStore::load(bytes.as_slice(), &mut fresh).unwrap();

            assert_eq!(loaded.variant, variant);
            assert_eq!(loaded.word_alpha, store.word_alpha);
            assert_eq!(loaded.type_alphas, store.type_alphas);
            assert_eq!(loaded.label_alpha, store.label_alpha);
            assert_eq!(loaded.sparse_alpha, store.sparse_alpha);
            assert_eq!(fresh.len(), arena.len(), "{variant}");

            let mut before = ParameterRegistry::new();
            store.export_parameters(&mut before);
            let mut after = ParameterRegistry::new();
            loaded.export_parameters(&mut after);
            assert_eq!(
                before.names().collect::<Vec<_>>(),
                after.names().collect::<Vec<_>>()
            );
            for (a, b) in before.vars().iter().zip(after.vars().iter()) {
                assert_eq!(a.dims(), b.dims());
                assert_eq!(values(a), values(b));
            }

            // saving the reloaded store reproduces the stream
            assert_eq!(loaded.save(Vec::new()).unwrap(), bytes);
        }
    }

    #[test]
    fn test_truncated_checkpoint_is_rejected() {
        let mut arena = ParamArena::new();
        let mut store = store_for(ModelVariant::Neural, &mut arena);
        store.initial(&mut hyper(), &mut arena).unwrap();
        let bytes = store.save(Vec::new()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let cut = text.find("@label-alphabet").unwrap();
        assert!(ParameterStore::load(&text.as_bytes()[..cut], &mut ParamArena::new()).is_err());
    }
}
