//! # Token Features
//!
//! [`FeatureRecord`] is the id-level input of a sequence graph. Upstream
//! extractors usually produce strings; [`RawFeature`] and [`RawSentence`]
//! carry those and map them to ids through a store's alphabets.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegtagError};
use crate::params::ParameterStore;

/// Per-token ids: one word, one optional id per type table (in table order),
/// character ids and active sparse feature ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub word: u32,
    #[serde(default)]
    pub types: Vec<u32>,
    #[serde(default)]
    pub chars: Vec<u32>,
    #[serde(default)]
    pub sparse: Vec<u32>,
}

impl FeatureRecord {
    pub fn new(word: u32) -> Self {
        Self {
            word,
            ..Self::default()
        }
    }

    pub fn with_types(mut self, types: Vec<u32>) -> Self {
        self.types = types;
        self
    }

    pub fn with_chars(mut self, chars: Vec<u32>) -> Self {
        self.chars = chars;
        self
    }

    pub fn with_sparse(mut self, sparse: Vec<u32>) -> Self {
        self.sparse = sparse;
        self
    }
}

/// String-level token features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFeature {
    #[serde(default)]
    pub word: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub chars: Vec<String>,
    #[serde(default)]
    pub sparse: Vec<String>,
}

impl RawFeature {
    /// Map every string to its id. Words, types and characters fall back to
    /// the unknown entry; sparse features the model never saw are dropped.
    /// Inputs the variant does not use are ignored.
    pub fn encode(&self, store: &ParameterStore) -> Result<FeatureRecord> {
        let variant = store.variant;
        let mut record = FeatureRecord::default();
        if variant.has_dense() {
            record.word = store.word_alpha.lookup(&self.word, "words")?;
            if self.types.len() > store.type_alphas.len() {
                return Err(SegtagError::Config(format!(
                    "token {:?} carries {} types, the model has {}",
                    self.word,
                    self.types.len(),
                    store.type_alphas.len()
                )));
            }
            record.types = self
                .types
                .iter()
                .zip(&store.type_alphas)
                .enumerate()
                .map(|(k, (key, alpha))| alpha.lookup(key, &format!("types[{k}]")))
                .collect::<Result<_>>()?;
        }
        if variant.has_chars() {
            record.chars = self
                .chars
                .iter()
                .map(|key| store.char_alpha.lookup(key, "chars"))
                .collect::<Result<_>>()?;
        }
        if variant.has_sparse() {
            record.sparse = self
                .sparse
                .iter()
                .filter_map(|key| store.sparse_alpha.index_of(key))
                .collect();
        }
        Ok(record)
    }
}

/// One sentence of string features, optionally with gold labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSentence {
    pub tokens: Vec<RawFeature>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl RawSentence {
    pub fn encode(&self, store: &ParameterStore) -> Result<Vec<FeatureRecord>> {
        self.tokens.iter().map(|token| token.encode(store)).collect()
    }

    /// Gold label ids, or `None` when the sentence is unlabelled.
    pub fn gold(&self, store: &ParameterStore) -> Result<Option<Vec<usize>>> {
        if self.labels.is_empty() {
            return Ok(None);
        }
        if self.labels.len() != self.tokens.len() {
            return Err(SegtagError::InvalidLabels(format!(
                "{} labels for {} tokens",
                self.labels.len(),
                self.tokens.len()
            )));
        }
        self.labels
            .iter()
            .map(|label| {
                store
                    .label_alpha
                    .index_of(label)
                    .map(|id| id as usize)
                    .ok_or_else(|| SegtagError::UnknownKey {
                        table: "labels".into(),
                        key: label.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}
