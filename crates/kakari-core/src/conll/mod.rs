//! # CoNLL Corpus I/O
//!
//! Reading and writing of dependency-annotated corpora in the 10-column
//! CoNLL-U / CoNLL-X layout.

pub mod reader;
pub mod writer;

pub use reader::{read_conll, ConllReader};
pub use writer::{annotate, write_conll};
