//! Linear-chain CRF output layer: loss, decoding and segmentation tags.

pub mod labels;
pub mod loss;
pub mod viterbi;

pub use labels::{segment, SegTag, TransitionMask};
pub use loss::CrfLoss;
pub use viterbi::ViterbiDecoder;
