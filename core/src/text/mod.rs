//! Text pipeline: sentence segmentation, normalization and capacity-aware splitting.

pub mod normalizer;
pub mod sentences;
pub mod splitter;

pub use normalizer::{normalize, Alphabet, Conversion, Frontend, TextConverter, TextNormalizer};
pub use sentences::{RuleSentenceTokenizer, SentenceTokenizer};
pub use splitter::split_segment;
