//! # Viterbi Decoding for CRF
//!
//! Finds the highest-scoring label sequence given per-token emission
//! scores, a `[from][to]` transition matrix and per-label start scores.

use crate::crf::labels::TransitionMask;
use crate::error::{Result, SegtagError};

/// Viterbi decoder for CRF label sequences.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
}

impl ViterbiDecoder {
    /// Decoder over `num_tags` labels.
    pub fn new(num_tags: usize) -> Self {
        Self { num_tags }
    }

    fn check_dims(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_scores: &[f32],
    ) -> Result<()> {
        if let Some(row) = emission_scores.iter().find(|row| row.len() != self.num_tags) {
            return Err(SegtagError::InvalidLabels(format!(
                "emission score dimension mismatch: expected {}, got {}",
                self.num_tags,
                row.len()
            )));
        }
        if transition_matrix.len() != self.num_tags
            || transition_matrix.iter().any(|row| row.len() != self.num_tags)
        {
            return Err(SegtagError::InvalidLabels(format!(
                "transition matrix must be {0}x{0}",
                self.num_tags
            )));
        }
        if start_scores.len() != self.num_tags {
            return Err(SegtagError::InvalidLabels(format!(
                "expected {} start scores, got {}",
                self.num_tags,
                start_scores.len()
            )));
        }
        Ok(())
    }

    /// Best label ids for `[tokens][labels]` emissions, a `[from][to]`
    /// transition matrix and per-label start scores.
    pub fn decode(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_scores: &[f32],
    ) -> Result<Vec<usize>> {
        self.decode_inner(emission_scores, transition_matrix, start_scores, None)
    }

    /// Decode with hard constraints: masked transitions and boundary labels
    /// are never chosen.
    pub fn decode_constrained(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_scores: &[f32],
        mask: &TransitionMask,
    ) -> Result<Vec<usize>> {
        if mask.num_tags() != self.num_tags {
            return Err(SegtagError::InvalidLabels(format!(
                "constraint mask covers {} labels, decoder has {}",
                mask.num_tags(),
                self.num_tags
            )));
        }
        self.decode_inner(emission_scores, transition_matrix, start_scores, Some(mask))
    }

    fn decode_inner(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_scores: &[f32],
        mask: Option<&TransitionMask>,
    ) -> Result<Vec<usize>> {
        let seq_len = emission_scores.len();
        if seq_len == 0 {
            return Ok(Vec::new());
        }
        self.check_dims(emission_scores, transition_matrix, start_scores)?;

        // best score ending in each label, plus back pointers
        let mut dp: Vec<Vec<f32>> = vec![vec![f32::NEG_INFINITY; self.num_tags]; seq_len];
        let mut backptr: Vec<Vec<Option<usize>>> = vec![vec![None; self.num_tags]; seq_len];

        // first token: start score + emission
        for tag in 0..self.num_tags {
            if mask.is_some_and(|m| !m.start[tag]) {
                continue;
            }
            dp[0][tag] = start_scores[tag] + emission_scores[0][tag];
        }

        for pos in 1..seq_len {
            for curr_tag in 0..self.num_tags {
                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = None;

                for prev_tag in 0..self.num_tags {
                    if mask.is_some_and(|m| !m.allowed[prev_tag][curr_tag]) {
                        continue;
                    }

                    let score = dp[pos - 1][prev_tag]
                        + transition_matrix[prev_tag][curr_tag]
                        + emission_scores[pos][curr_tag];

                    if score > best_score {
                        best_score = score;
                        best_prev = Some(prev_tag);
                    }
                }

                dp[pos][curr_tag] = best_score;
                backptr[pos][curr_tag] = best_prev;
            }
        }

        // Backtrack
        let mut best_final_tag = 0;
        let mut best_final_score = f32::NEG_INFINITY;
        for tag in 0..self.num_tags {
            if mask.is_some_and(|m| !m.end[tag]) {
                continue;
            }
            if dp[seq_len - 1][tag] > best_final_score {
                best_final_score = dp[seq_len - 1][tag];
                best_final_tag = tag;
            }
        }

        if best_final_score == f32::NEG_INFINITY {
            return Err(SegtagError::InvalidLabels(format!(
                "no label sequence of length {seq_len} satisfies the constraints"
            )));
        }

        let mut path = vec![best_final_tag];
        let mut curr_tag = best_final_tag;

        for pos in (1..seq_len).rev() {
            curr_tag = backptr[pos][curr_tag].unwrap_or(0);
            path.push(curr_tag);
        }

        path.reverse();
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;

    #[test]
    fn test_viterbi_follows_emissions_without_transitions() {
        let decoder = ViterbiDecoder::new(3);
        let transitions = vec![vec![0.0; 3]; 3];
        let emissions = vec![vec![1.0, 0.0, 0.0], vec![0.0, 0.0, 2.0], vec![0.0, 3.0, 0.0]];

        let path = decoder.decode(&emissions, &transitions, &[0.0; 3]).unwrap();
        assert_eq!(path, vec![0, 2, 1]);
    }

    #[test]
    fn test_transitions_override_weak_emissions() {
        let decoder = ViterbiDecoder::new(2);
        // staying on label 0 is strongly rewarded
        let transitions = vec![vec![5.0, -5.0], vec![0.0, 0.0]];
        let emissions = vec![vec![1.0, 0.0], vec![0.0, 1.0]];

        let path = decoder.decode(&emissions, &transitions, &[0.0, 0.0]).unwrap();
        assert_eq!(path, vec![0, 0]);
    }

    #[test]
    fn test_viterbi_empty() {
        let decoder = ViterbiDecoder::new(4);
        let transitions = vec![vec![0.0; 4]; 4];
        let emissions: Vec<Vec<f32>> = vec![];

        let result = decoder.decode(&emissions, &transitions, &[0.0; 4]).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let decoder = ViterbiDecoder::new(4);
        let transitions = vec![vec![0.0; 4]; 4];
        let emissions = vec![vec![0.0; 3]];
        assert!(decoder.decode(&emissions, &transitions, &[0.0; 4]).is_err());
    }

    #[test]
    fn test_decode_constrained_yields_valid_bmes() {
        let labels = Alphabet::from_entries(["b", "m", "e", "s"]);
        let mask = TransitionMask::from_labels(&labels).unwrap();
        let decoder = ViterbiDecoder::new(4);
        let transitions = vec![vec![0.0; 4]; 4];
        // unconstrained argmax would be e, b, m: invalid at every step
        let emissions = vec![
            vec![0.0, 0.0, 2.0, 0.0],
            vec![2.0, 0.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0, 0.0],
        ];

        let path = decoder
            .decode_constrained(&emissions, &transitions, &[0.0; 4], &mask)
            .unwrap();
        assert!(mask.start[path[0]]);
        assert!(mask.end[path[2]]);
        for pair in path.windows(2) {
            assert!(mask.allowed[pair[0]][pair[1]]);
        }
    }

    #[test]
    fn test_constraints_without_a_valid_path() {
        // b cannot end a sentence and e cannot start one
        let labels = Alphabet::from_entries(["b", "e"]);
        let mask = TransitionMask::from_labels(&labels).unwrap();
        let decoder = ViterbiDecoder::new(2);
        let transitions = vec![vec![0.0; 2]; 2];

        let err = decoder
            .decode_constrained(&[vec![1.0, 0.0]], &transitions, &[0.0; 2], &mask)
            .unwrap_err();
        assert!(matches!(err, SegtagError::InvalidLabels(_)));

        let path = decoder
            .decode_constrained(&[vec![0.0; 2], vec![0.0; 2]], &transitions, &[0.0; 2], &mask)
            .unwrap();
        assert_eq!(path, vec![0, 1]);
    }
}
