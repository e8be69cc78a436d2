use candle_core::Tensor;
use candle_nn::{Init, Linear, VarBuilder};

use super::{append_ones, project};
use crate::error::Result;

/// Biaffine arc scorer.
///
/// Each token is projected into a dependent vector and a head vector by two
/// independent linear maps. With a constant 1 appended to the dependent
/// vector, `score[i][j] = [dep_i; 1]ᵀ W head_j`; the last row of `W` is the
/// head-only bias term.
pub struct BiaffineArcScorer {
    dep_proj: Linear,
    head_proj: Linear,
    /// `(arc_dim + 1, arc_dim)`, zero-initialised.
    weight: Tensor,
    dropout: f32,
}

impl BiaffineArcScorer {
    pub fn new(input_dim: usize, arc_dim: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let dep_proj = candle_nn::linear(input_dim, arc_dim, vb.pp("dep"))?;
        let head_proj = candle_nn::linear(input_dim, arc_dim, vb.pp("head"))?;
        let weight = vb.get_with_hints((arc_dim + 1, arc_dim), "weight", Init::Const(0.0))?;
        Ok(Self {
            dep_proj,
            head_proj,
            weight,
            dropout,
        })
    }

    /// Scores every (dependent, head) pair.
    ///
    /// `repr`: `(batch, N, input_dim)` → `(batch, N, N)` indexed
    /// `[b][dependent][head]`. No masking is applied here.
    pub fn forward(&self, repr: &Tensor, train: bool) -> Result<Tensor> {
        let dep = project(&self.dep_proj, repr, self.dropout, train)?;
        let head = project(&self.head_proj, repr, self.dropout, train)?;

        let dep = append_ones(&dep)?;
        let head_t = head.transpose(1, 2)?.contiguous()?;
        let scores = dep.broadcast_matmul(&self.weight)?.matmul(&head_t)?;
        Ok(scores)
    }

    /// [`forward`](Self::forward) plus an additive mask from
    /// [`arc_mask`](super::arc_mask).
    pub fn forward_masked(&self, repr: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        Ok(self.forward(repr, train)?.add(mask)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{arc_mask, MASK_VALUE};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn scorer(varmap: &VarMap) -> BiaffineArcScorer {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        BiaffineArcScorer::new(6, 4, 0.0, vb.pp("arc")).unwrap()
    }

    fn randomize_weight(varmap: &VarMap) {
        let data = varmap.data().lock().unwrap();
        let weight = data.get("arc.weight").unwrap();
        let random = Tensor::randn(0f32, 1f32, (5, 4), &Device::Cpu).unwrap();
        weight.set(&random).unwrap();
    }

    #[test]
    fn output_is_square_per_sentence() {
        let varmap = VarMap::new();
        let scorer = scorer(&varmap);
        let repr = Tensor::randn(0f32, 1f32, (2, 5, 6), &Device::Cpu).unwrap();
        let scores = scorer.forward(&repr, false).unwrap();
        assert_eq!(scores.dims(), &[2, 5, 5]);
    }

    #[test]
    fn zero_initialised_weight_gives_uniform_scores() {
        let varmap = VarMap::new();
        let scorer = scorer(&varmap);
        let repr = Tensor::randn(0f32, 1f32, (1, 3, 6), &Device::Cpu).unwrap();
        let sum = scorer
            .forward(&repr, false)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(sum, 0.0);
    }

    #[test]
    fn scores_are_directional() {
        let varmap = VarMap::new();
        let scorer = scorer(&varmap);
        randomize_weight(&varmap);
        let repr = Tensor::randn(0f32, 1f32, (1, 4, 6), &Device::Cpu).unwrap();
        let scores = scorer.forward(&repr, false).unwrap().to_vec3::<f32>().unwrap();
        let asymmetric = (0..4).any(|i| (0..4).any(|j| (scores[0][i][j] - scores[0][j][i]).abs() > 1e-4));
        assert!(asymmetric);
    }

    #[test]
    fn mask_suppresses_self_loops() {
        let varmap = VarMap::new();
        let scorer = scorer(&varmap);
        randomize_weight(&varmap);
        let repr = Tensor::randn(0f32, 1f32, (1, 4, 6), &Device::Cpu).unwrap();
        let mask = arc_mask(&[3], 4, &Device::Cpu).unwrap();
        let scores = scorer
            .forward_masked(&repr, &mask, false)
            .unwrap()
            .to_vec3::<f32>()
            .unwrap();
        for i in 0..4 {
            assert!(scores[0][i][i] < MASK_VALUE / 2.0);
        }
    }
}
