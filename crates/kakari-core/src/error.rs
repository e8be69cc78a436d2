use thiserror::Error;

/// Errors that can occur during Kakari core operations.
#[derive(Debug, Error)]
pub enum KakariError {
    /// A score matrix does not match the declared sentence length.
    #[error("score matrix shape mismatch: expected {expected}x{expected}, got {actual}")]
    Shape {
        /// Expected side length (sentence length + 1 for the root).
        expected: usize,
        /// Observed shape, formatted for display.
        actual: String,
    },

    /// Cycle contraction did not terminate within its bound.
    #[error("tree decoding did not terminate for a sentence of length {length} after {iterations} contractions")]
    Decode {
        /// Number of tokens in the sentence (root excluded).
        length: usize,
        /// Contractions performed before giving up.
        iterations: usize,
    },

    /// A gold relation label is outside the closed label vocabulary.
    #[error("label {label:?} is not in the label vocabulary")]
    UnknownLabel {
        /// The offending label.
        label: String,
    },

    /// NaN or infinite values in scores or loss.
    #[error("numeric instability in {context}")]
    NumericInstability {
        /// Where the non-finite value was observed.
        context: String,
    },

    /// A CoNLL line could not be parsed.
    #[error("CoNLL parse error at line {line}: {message}")]
    Conll {
        /// 1-based line number in the input.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// Gold heads do not form a tree rooted at the virtual root.
    #[error("malformed dependency tree: {0}")]
    MalformedTree(String),

    /// Greedy decodes are not comparable to the standard evaluation protocol.
    #[error("evaluation requires well-formed decoding, got a {0} decode")]
    NonComparableDecode(&'static str),

    /// The pretrained embedding file is inconsistent.
    #[error("embedding file error: {0}")]
    Embedding(String),

    /// A regex pattern failed to compile (should not happen with static patterns).
    #[error("regex compilation error: {0}")]
    Regex(#[from] regex::Error),

    /// I/O failure while reading or writing corpora.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Candle tensor framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for Kakari operations.
pub type Result<T> = std::result::Result<T, KakariError>;
