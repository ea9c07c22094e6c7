//! # Segtag Core
//!
//! Modeling core of CRF sequence taggers for character-level word
//! segmentation. A [`ParameterStore`] owns embedding tables, projection,
//! recurrent and sparse weight blocks plus the CRF transition matrix; a
//! [`SequenceGraph`] turns per-token [`FeatureRecord`]s into label scores;
//! [`CrfLoss`] trains and decodes on top of them. Four structural variants
//! (see [`ModelVariant`]) share one implementation.
//!
//! ## Quick Start
//!
//! ```rust
//! use segtag_core::{Alphabet, FeatureRecord, LookupTable, Model, ModelOptions, ModelVariant};
//!
//! let options = ModelOptions::new()
//!     .with_variant(ModelVariant::Neural)
//!     .with_word_context(1)
//!     .with_hidden_sizes(8, 4);
//! let mut model = Model::new(options).unwrap();
//!
//! let words = Alphabet::from_entries(["-unknown-", "上", "海"]);
//! let table = LookupTable::random(model.arena_mut(), "words", words.len(), 4).unwrap();
//! model.store.set_words(words, table);
//! model.store.set_labels(Alphabet::from_entries(["b", "m", "e", "s"]));
//! model.initial().unwrap();
//!
//! let mut graph = model.graph().unwrap();
//! let labels = model
//!     .decode_labels(&mut graph, &[FeatureRecord::new(1), FeatureRecord::new(2)])
//!     .unwrap();
//! assert_eq!(labels.len(), 2);
//! ```
pub mod alphabet;
pub mod checkpoint;
pub mod config;
pub mod crf;
pub mod error;
pub mod gradcheck;
pub mod graph;
pub mod hyper;
pub mod model;
pub mod optim;
pub mod params;

// Re-export primary API
pub use alphabet::Alphabet;
pub use config::{ModelOptions, ModelVariant};
pub use crf::{segment, CrfLoss, SegTag, TransitionMask, ViterbiDecoder};
pub use error::{Result, SegtagError};
pub use gradcheck::{GradCheckSink, GradReport, GradientCheck};
pub use graph::{
    FeatureRecord, GraphCapacity, Phase, RawFeature, RawSentence, SequenceGraph, TokenBuffers,
};
pub use hyper::{HyperParameters, ParameterShapes};
pub use model::Model;
pub use optim::{AdaGrad, AdaGradConfig, ParameterRegistry, ParameterSink};
pub use params::{LookupTable, ParamArena, ParameterStore};
