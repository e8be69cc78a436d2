//! # Kakari
//!
//! Biaffine dependency parsing. [`kakari_core`] holds the scorers, the tree
//! decoder and evaluation; [`kakari_trainer`] holds the encoder, training
//! loop and checkpoints.
//!
//! ```no_run
//! use kakari::kakari_trainer::{parse_corpus, restore};
//! use kakari::{read_conll, TreeDecoder};
//!
//! # fn main() -> anyhow::Result<()> {
//! let model = restore("model/".as_ref(), &candle_core::Device::Cpu)?;
//! let sentences = read_conll("test.conllu")?;
//! let trees = parse_corpus(
//!     &model.parser,
//!     &sentences,
//!     &model.context.vocabs,
//!     &TreeDecoder::default(),
//!     model.context.batch_tokens,
//! )?;
//! # Ok(())
//! # }
//! ```

pub use kakari_core;
pub use kakari_trainer;

pub use kakari_core::{
    read_conll, write_conll, ArcScores, AttachmentScores, DecodeMode, DecoderConfig, Evaluator,
    KakariError, PredictedTree, Sentence, Token, TreeDecoder, Vocabularies,
};
pub use kakari_trainer::{BiaffineParser, ModelConfig, TrainConfig, Trainer};
