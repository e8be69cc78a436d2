//! # Kakari Core
//!
//! Scoring and decoding for graph-based dependency parsing. Provides the
//! biaffine arc and label scorers, the training objective, greedy and
//! maximum-spanning-tree decoders, UAS/LAS evaluation, and the CoNLL and
//! vocabulary plumbing they sit on.
//!
//! ## Quick Start
//!
//! ```rust
//! use kakari_core::{ArcScores, DecoderConfig, TreeDecoder};
//!
//! // root, dog, The, barks
//! let scores = ArcScores::from_rows(vec![
//!     vec![0.0, 0.0, 0.0, 0.0],
//!     vec![0.0, 0.0, 1.0, 9.0],
//!     vec![0.0, 9.0, 0.0, 1.0],
//!     vec![9.0, 1.0, 1.0, 0.0],
//! ])
//! .unwrap();
//!
//! let decoder = TreeDecoder::new(DecoderConfig::default());
//! assert_eq!(decoder.decode(&scores, 3).unwrap(), vec![3, 1, 0]);
//! ```
pub mod conll;
pub mod decode;
pub mod error;
pub mod eval;
pub mod scoring;
pub mod types;
pub mod vocab;

// Re-export primary API
pub use conll::{annotate, read_conll, write_conll, ConllReader};
pub use decode::{chu_liu_edmonds, greedy_heads, DecoderConfig, TreeDecoder};
pub use error::{KakariError, Result};
pub use eval::{AttachmentScores, Evaluator, PunctPolicy, DEFAULT_PUNCT_TAGS};
pub use scoring::{
    arc_mask, label_targets, BiaffineArcScorer, BiaffineLabelScorer, Loss, PairIndex,
    TrainingObjective,
};
pub use types::{ArcScores, DecodeMode, PredictedTree, Sentence, Token};
pub use vocab::{Vocabularies, Vocabulary, VocabularyBuilder};
