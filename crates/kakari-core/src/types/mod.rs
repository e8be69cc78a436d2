pub mod scores;
pub mod sentence;
pub mod tree;

pub use scores::ArcScores;
pub use sentence::{check_tree, Sentence, Token, ROOT_FORM, ROOT_RELATION, ROOT_TAG};
pub use tree::{DecodeMode, PredictedTree};
