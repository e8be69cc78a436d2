use candle_core::{Tensor, D};
use candle_nn::{Init, Linear, VarBuilder};

use super::{append_ones, project, PairIndex};
use crate::error::Result;

/// Biaffine label scorer.
///
/// Same shape as the arc scorer but with one bilinear form per label, and a
/// constant appended to both the dependent and the head vector, so every
/// label gets a bilinear term, two linear terms and a bias. Only the pairs
/// listed in a [`PairIndex`] are scored.
pub struct BiaffineLabelScorer {
    dep_proj: Linear,
    head_proj: Linear,
    /// `(label_dim + 1, num_labels * (label_dim + 1))`, i.e. a
    /// `(label_dim + 1, num_labels, label_dim + 1)` tensor laid out flat.
    weight: Tensor,
    label_dim: usize,
    num_labels: usize,
    dropout: f32,
}

impl BiaffineLabelScorer {
    pub fn new(
        input_dim: usize,
        label_dim: usize,
        num_labels: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let dep_proj = candle_nn::linear(input_dim, label_dim, vb.pp("dep"))?;
        let head_proj = candle_nn::linear(input_dim, label_dim, vb.pp("head"))?;
        let weight = vb.get_with_hints(
            (label_dim + 1, num_labels * (label_dim + 1)),
            "weight",
            Init::Const(0.0),
        )?;
        Ok(Self {
            dep_proj,
            head_proj,
            weight,
            label_dim,
            num_labels,
            dropout,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Scores the labels of the selected pairs.
    ///
    /// `repr`: `(batch, N, input_dim)` → `(pairs.len(), num_labels)`.
    pub fn forward(&self, repr: &Tensor, pairs: &PairIndex, train: bool) -> Result<Tensor> {
        let (batch, tokens, input_dim) = repr.dims3()?;
        let flat = repr.reshape((batch * tokens, input_dim))?;

        let dep_in = flat.index_select(&pairs.dependents, 0)?;
        let head_in = flat.index_select(&pairs.heads, 0)?;
        let dep = append_ones(&project(&self.dep_proj, &dep_in, self.dropout, train)?)?;
        let head = append_ones(&project(&self.head_proj, &head_in, self.dropout, train)?)?;

        let m = pairs.len();
        let width = self.label_dim + 1;
        let scores = dep
            .matmul(&self.weight)?
            .reshape((m, self.num_labels, width))?
            .broadcast_mul(&head.unsqueeze(1)?)?
            .sum(D::Minus1)?;
        Ok(scores)
    }

    /// Argmax label for every selected pair; ties go to the lowest id.
    pub fn predict(&self, repr: &Tensor, pairs: &PairIndex) -> Result<Vec<usize>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let scores = self.forward(repr, pairs, false)?.to_vec2::<f32>()?;
        Ok(scores
            .iter()
            .map(|row| {
                let mut best = 0;
                for (label, &score) in row.iter().enumerate() {
                    if score > row[best] {
                        best = label;
                    }
                }
                best
            })
            .collect())
    }
}
