//! # Kakari Trainer
//!
//! Everything around the scoring core needed to train and run a parser:
//! the BiLSTM representation provider, padded token-budget batches, the
//! AdamW training loop with annealing and gradient clipping, and
//! checkpoint directories.

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod model;
pub mod trainer;

pub use checkpoint::{restore, LoadedModel, ModelContext};
pub use config::{ModelConfig, TrainConfig};
pub use data::{load_corpus, Batch, Batcher, EncodedSentence, PretrainedEmbeddings};
pub use model::{BiLstmEncoder, BiaffineParser, RepresentationProvider};
pub use trainer::{evaluate, parse_corpus, EpochReport, Trainer};
