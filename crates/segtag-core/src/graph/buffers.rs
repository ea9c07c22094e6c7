//! # Token Buffers
//!
//! Fixed-capacity id storage of a sequence graph. Slots are allocated once
//! for `max_sentence_length` tokens and `max_char_length` characters per
//! token, cleared by [`TokenBuffers::reset`] and refilled for every sentence.

use crate::error::{Result, SegtagError};
use crate::graph::FeatureRecord;

/// Token and character caps of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphCapacity {
    pub max_sentence_length: usize,
    pub max_char_length: usize,
}

impl Default for GraphCapacity {
    fn default() -> Self {
        Self {
            max_sentence_length: crate::config::DEFAULT_MAX_SENTENCE_LENGTH,
            max_char_length: crate::config::DEFAULT_MAX_CHAR_LENGTH,
        }
    }
}

/// Row counts of the tables ids are checked against, and which id kinds the
/// graph consumes at all. Ids of a consumed kind are range-checked even when
/// its table is empty; ids of an unused kind are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VocabSizes {
    pub words: usize,
    pub types: Vec<usize>,
    pub chars: usize,
    pub sparse: usize,
    /// Word and type ids feed a dense pipeline.
    pub has_dense: bool,
    /// Character ids are pooled.
    pub has_chars: bool,
    /// Sparse feature ids are scored.
    pub has_sparse: bool,
}

fn check_id(table: &str, id: u32, size: usize) -> Result<u32> {
    if (id as usize) < size {
        Ok(id)
    } else {
        Err(SegtagError::IdOutOfRange {
            table: table.to_string(),
            id,
            size,
        })
    }
}

/// Pre-allocated per-token id slots.
#[derive(Debug, Clone)]
pub struct TokenBuffers {
    capacity: GraphCapacity,
    vocab: VocabSizes,
    len: usize,
    word_ids: Vec<u32>,
    /// `max_sentence_length x type slots`; missing types hold id 0.
    type_ids: Vec<u32>,
    /// 1.0 where the token carries the type, 0.0 otherwise.
    type_mask: Vec<f32>,
    /// `max_sentence_length x max_char_length`.
    char_ids: Vec<u32>,
    char_counts: Vec<usize>,
    sparse_ids: Vec<Vec<u32>>,
}

impl TokenBuffers {
    pub fn new(capacity: GraphCapacity, vocab: VocabSizes) -> Self {
        let mut buffers = Self {
            capacity,
            vocab,
            len: 0,
            word_ids: Vec::new(),
            type_ids: Vec::new(),
            type_mask: Vec::new(),
            char_ids: Vec::new(),
            char_counts: Vec::new(),
            sparse_ids: Vec::new(),
        };
        buffers.allocate();
        buffers
    }

    fn allocate(&mut self) {
        let tokens = self.capacity.max_sentence_length;
        let slots = self.vocab.types.len();
        self.word_ids = vec![0; tokens];
        self.type_ids = vec![0; tokens * slots];
        self.type_mask = vec![0.0; tokens * slots];
        self.char_ids = vec![0; tokens * self.capacity.max_char_length];
        self.char_counts = vec![0; tokens];
        self.sparse_ids = vec![Vec::new(); tokens];
    }

    pub fn capacity(&self) -> GraphCapacity {
        self.capacity
    }

    /// Change the caps. Storage is reallocated only when they differ.
    pub fn resize(&mut self, capacity: GraphCapacity) {
        if capacity != self.capacity {
            self.capacity = capacity;
            self.allocate();
        }
        self.len = 0;
    }

    /// Clear the used slots without releasing storage.
    pub fn reset(&mut self) {
        let slots = self.vocab.types.len();
        let max_char = self.capacity.max_char_length;
        for i in 0..self.len {
            self.word_ids[i] = 0;
            self.type_ids[i * slots..(i + 1) * slots].fill(0);
            self.type_mask[i * slots..(i + 1) * slots].fill(0.0);
            self.char_ids[i * max_char..(i + 1) * max_char].fill(0);
            self.char_counts[i] = 0;
            self.sparse_ids[i].clear();
        }
        self.len = 0;
    }

    /// Reset, then copy a sentence's ids in. Character lists longer than the
    /// cap are truncated; every stored id is range-checked.
    pub fn fill(&mut self, features: &[FeatureRecord]) -> Result<()> {
        self.reset();
        let max = self.capacity.max_sentence_length;
        if features.len() > max {
            return Err(SegtagError::SentenceTooLong {
                len: features.len(),
                max,
            });
        }

        let slots = self.vocab.types.len();
        let max_char = self.capacity.max_char_length;
        for (i, feature) in features.iter().enumerate() {
            // mark the slot used first so a failed fill still resets it
            self.len = i + 1;
            if self.vocab.has_dense {
                self.word_ids[i] = check_id("words", feature.word, self.vocab.words)?;
                if feature.types.len() > slots {
                    return Err(SegtagError::Config(format!(
                        "token {i} carries {} type ids, the model has {slots} type tables",
                        feature.types.len()
                    )));
                }
                for (k, &id) in feature.types.iter().enumerate() {
                    let size = self.vocab.types[k];
                    self.type_ids[i * slots + k] = check_id(&format!("types[{k}]"), id, size)?;
                    self.type_mask[i * slots + k] = 1.0;
                }
            }

            if self.vocab.has_chars {
                let kept = feature.chars.len().min(max_char);
                for (c, &id) in feature.chars[..kept].iter().enumerate() {
                    self.char_ids[i * max_char + c] = check_id("chars", id, self.vocab.chars)?;
                }
                self.char_counts[i] = kept;
            }

            if self.vocab.has_sparse {
                for &id in &feature.sparse {
                    self.sparse_ids[i].push(check_id("sparse", id, self.vocab.sparse)?);
                }
            }
        }
        Ok(())
    }

    /// Tokens currently filled.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn words(&self) -> &[u32] {
        &self.word_ids[..self.len]
    }

    pub fn type_slots(&self) -> usize {
        self.vocab.types.len()
    }

    /// Ids and presence mask of type slot `k` for every filled token.
    pub fn type_column(&self, k: usize) -> (Vec<u32>, Vec<f32>) {
        let slots = self.type_slots();
        (0..self.len)
            .map(|i| (self.type_ids[i * slots + k], self.type_mask[i * slots + k]))
            .unzip()
    }

    /// Kept character ids of token `i`.
    pub fn chars(&self, i: usize) -> &[u32] {
        let start = i * self.capacity.max_char_length;
        &self.char_ids[start..start + self.char_counts[i]]
    }

    pub fn sparse(&self, i: usize) -> &[u32] {
        &self.sparse_ids[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers(max_sentence_length: usize, max_char_length: usize) -> TokenBuffers {
        TokenBuffers::new(
            GraphCapacity {
                max_sentence_length,
                max_char_length,
            },
            VocabSizes {
                words: 10,
                types: vec![3, 2],
                chars: 20,
                sparse: 5,
                has_dense: true,
                has_chars: true,
                has_sparse: true,
            },
        )
    }

    #[test]
    fn test_fill_and_read_back() {
        let mut b = buffers(4, 3);
        b.fill(&[
            FeatureRecord::new(1).with_types(vec![2, 1]).with_chars(vec![5, 6]),
            FeatureRecord::new(7).with_types(vec![0]).with_sparse(vec![4, 0]),
        ])
        .unwrap();

        assert_eq!(b.len(), 2);
        assert_eq!(b.words(), &[1, 7]);
        assert_eq!(b.type_column(0), (vec![2, 0], vec![1.0, 1.0]));
        assert_eq!(b.type_column(1), (vec![1, 0], vec![1.0, 0.0]));
        assert_eq!(b.chars(0), &[5, 6]);
        assert!(b.chars(1).is_empty());
        assert_eq!(b.sparse(1), &[4, 0]);
    }

    #[test]
    fn test_long_char_lists_are_truncated() {
        let mut b = buffers(2, 3);
        // the ids past the cap are out of range and must never be touched
        b.fill(&[FeatureRecord::new(0).with_chars(vec![1, 2, 3, 99, 100])])
            .unwrap();
        assert_eq!(b.chars(0), &[1, 2, 3]);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut b = buffers(2, 3);
        let sentence = vec![FeatureRecord::new(0); 3];
        assert!(matches!(
            b.fill(&sentence),
            Err(SegtagError::SentenceTooLong { len: 3, max: 2 })
        ));
    }

    #[test]
    fn test_out_of_range_ids() {
        let mut b = buffers(2, 3);
        let err = b.fill(&[FeatureRecord::new(10)]).unwrap_err();
        assert!(matches!(err, SegtagError::IdOutOfRange { id: 10, size: 10, .. }));
        let err = b
            .fill(&[FeatureRecord::new(0).with_types(vec![0, 2])])
            .unwrap_err();
        assert!(matches!(err, SegtagError::IdOutOfRange { id: 2, size: 2, .. }));
    }

    #[test]
    fn test_reset_clears_previous_sentence() {
        let mut b = buffers(3, 2);
        b.fill(&[
            FeatureRecord::new(3).with_chars(vec![1]).with_sparse(vec![2]),
            FeatureRecord::new(4),
        ])
        .unwrap();
        b.fill(&[FeatureRecord::new(5)]).unwrap();
        assert_eq!(b.words(), &[5]);
        assert!(b.chars(0).is_empty());
        assert!(b.sparse(0).is_empty());

        b.resize(GraphCapacity {
            max_sentence_length: 1,
            max_char_length: 2,
        });
        assert!(b.is_empty());
        assert!(b.fill(&[FeatureRecord::new(0), FeatureRecord::new(0)]).is_err());
    }

    #[test]
    fn test_empty_table_still_rejects_ids() {
        let mut b = TokenBuffers::new(
            GraphCapacity::default(),
            VocabSizes {
                sparse: 0,
                has_sparse: true,
                ..VocabSizes::default()
            },
        );
        let err = b
            .fill(&[FeatureRecord::default().with_sparse(vec![7])])
            .unwrap_err();
        assert!(matches!(err, SegtagError::IdOutOfRange { id: 7, size: 0, .. }));
        b.fill(&[FeatureRecord::default()]).unwrap();
    }

    #[test]
    fn test_unused_id_kinds_are_ignored() {
        let mut b = TokenBuffers::new(
            GraphCapacity::default(),
            VocabSizes {
                sparse: 3,
                has_sparse: true,
                ..VocabSizes::default()
            },
        );
        b.fill(&[FeatureRecord::new(40).with_chars(vec![9]).with_sparse(vec![2])])
            .unwrap();
        assert!(b.chars(0).is_empty());
        assert_eq!(b.sparse(0), &[2]);
    }
}
