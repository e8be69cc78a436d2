use std::fmt;

use serde::{Deserialize, Serialize};

use super::sentence::check_tree;

/// How arc scores were turned into heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecodeMode {
    /// Independent per-token argmax. May contain cycles.
    Greedy,
    /// Maximum spanning arborescence rooted at the virtual root.
    WellFormed,
}

impl Default for DecodeMode {
    fn default() -> Self {
        Self::WellFormed
    }
}

impl DecodeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::WellFormed => "well-formed",
        }
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labeled heads predicted for one sentence.
///
/// `heads[i]` and `labels[i]` belong to token `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedTree {
    heads: Vec<usize>,
    labels: Vec<usize>,
    mode: DecodeMode,
}

impl PredictedTree {
    /// # Panics
    /// Panics if `heads` and `labels` differ in length.
    #[must_use]
    pub fn new(heads: Vec<usize>, labels: Vec<usize>, mode: DecodeMode) -> Self {
        assert_eq!(heads.len(), labels.len(), "one label per head");
        Self {
            heads,
            labels,
            mode,
        }
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    pub fn heads(&self) -> &[usize] {
        &self.heads
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Head of the 1-based `token`.
    pub fn head(&self, token: usize) -> usize {
        self.heads[token - 1]
    }

    /// Label id of the 1-based `token`.
    pub fn label(&self, token: usize) -> usize {
        self.labels[token - 1]
    }

    /// `true` if every token reaches the root without revisiting a node.
    pub fn is_well_formed(&self) -> bool {
        check_tree(&self.heads).is_ok()
    }
}
