//! # Tree Decoding
//!
//! Turns an arc score matrix into one head per token. Greedy decoding is a
//! per-row argmax; well-formed decoding returns the maximum spanning
//! arborescence rooted at the virtual root.

pub mod greedy;
pub mod mst;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ArcScores, DecodeMode};

pub use greedy::greedy_heads;
pub use mst::chu_liu_edmonds;

/// Configuration for [`TreeDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DecoderConfig {
    /// Which decoding algorithm to run.
    pub mode: DecodeMode,
    /// Require exactly one token attached to the root (well-formed mode only).
    pub single_root: bool,
}

impl DecoderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: DecodeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_single_root(mut self, single_root: bool) -> Self {
        self.single_root = single_root;
        self
    }
}

/// Stateless decoder; each call is a pure function of one score matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeDecoder {
    config: DecoderConfig,
}

impl TreeDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> DecoderConfig {
        self.config
    }

    /// Decodes heads for tokens `1..=sentence_len`.
    ///
    /// Fails with a shape error when `scores` is not
    /// `(sentence_len + 1) × (sentence_len + 1)`.
    pub fn decode(&self, scores: &ArcScores, sentence_len: usize) -> Result<Vec<usize>> {
        scores.ensure_len(sentence_len)?;
        match self.config.mode {
            DecodeMode::Greedy => Ok(greedy_heads(scores)),
            DecodeMode::WellFormed if self.config.single_root => single_root_tree(scores),
            DecodeMode::WellFormed => chu_liu_edmonds(scores),
        }
    }
}

/// Best arborescence with exactly one root attachment.
///
/// The unconstrained optimum is kept when it already has a single root
/// child. Otherwise every candidate root child is tried with the other root
/// arcs removed; ties go to the lowest child.
pub fn single_root_tree(scores: &ArcScores) -> Result<Vec<usize>> {
    let heads = chu_liu_edmonds(scores)?;
    if heads.iter().filter(|&&h| h == 0).count() <= 1 {
        return Ok(heads);
    }

    let n = scores.sentence_len();
    let mut best: Option<(f32, Vec<usize>)> = None;
    for child in 1..=n {
        if scores.get(child, 0) == f32::NEG_INFINITY {
            continue;
        }
        let mut restricted = scores.clone();
        for dep in 1..=n {
            if dep != child {
                restricted.set(dep, 0, f32::NEG_INFINITY);
            }
        }
        let candidate = chu_liu_edmonds(&restricted)?;
        let total = scores.tree_score(&candidate);
        if best.as_ref().is_none_or(|(score, _)| total > *score) {
            best = Some((total, candidate));
        }
    }
    Ok(best.map(|(_, heads)| heads).unwrap_or(heads))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KakariError;

    fn matrix(rows: Vec<Vec<f32>>) -> ArcScores {
        ArcScores::from_rows(rows).unwrap()
    }

    #[test]
    fn rejects_mismatched_length() {
        let decoder = TreeDecoder::default();
        let scores = matrix(vec![vec![0.0; 3]; 3]);
        let err = decoder.decode(&scores, 3).unwrap_err();
        assert!(matches!(err, KakariError::Shape { expected: 4, .. }));
    }

    #[test]
    fn greedy_mode_keeps_cycles_well_formed_mode_does_not() {
        let scores = matrix(vec![
            vec![0.0, 0.0, 0.0],
            vec![1.0, 0.0, 10.0],
            vec![4.0, 9.0, 0.0],
        ]);
        let greedy = TreeDecoder::new(DecoderConfig::new().with_mode(DecodeMode::Greedy));
        assert_eq!(greedy.decode(&scores, 2).unwrap(), vec![2, 1]);

        let mst = TreeDecoder::default();
        assert_eq!(mst.decode(&scores, 2).unwrap(), vec![2, 0]);
    }

    #[test]
    fn single_root_constraint_picks_best_child() {
        // Both tokens prefer the root; 2 -> 1 is the better second arc.
        let scores = matrix(vec![
            vec![0.0, 0.0, 0.0],
            vec![10.0, 0.0, 1.0],
            vec![8.0, 5.0, 0.0],
        ]);
        let free = TreeDecoder::default();
        assert_eq!(free.decode(&scores, 2).unwrap(), vec![0, 0]);

        let single = TreeDecoder::new(DecoderConfig::new().with_single_root(true));
        assert_eq!(single.decode(&scores, 2).unwrap(), vec![0, 1]);
    }
}
