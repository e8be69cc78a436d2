use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use super::PairIndex;
use crate::error::{KakariError, Result};

/// Mean softmax cross-entropy of each real dependent over its candidate heads.
///
/// `arc_scores`: `(batch, N, N)` (masked); the root row and padding rows are
/// never selected by `pairs`.
pub fn arc_loss(arc_scores: &Tensor, pairs: &PairIndex) -> Result<Tensor> {
    let (batch, tokens, heads) = arc_scores.dims3()?;
    let rows = arc_scores
        .reshape((batch * tokens, heads))?
        .index_select(&pairs.dependents, 0)?;
    Ok(candle_nn::loss::cross_entropy(&rows, &pairs.head_positions)?)
}

/// Mean softmax cross-entropy over labels at the scored pairs.
pub fn label_loss(label_scores: &Tensor, gold_labels: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::loss::cross_entropy(label_scores, gold_labels)?)
}

/// Weighted sum of arc and label losses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingObjective {
    pub arc_weight: f64,
    pub label_weight: f64,
}

impl Default for TrainingObjective {
    fn default() -> Self {
        Self {
            arc_weight: 1.0,
            label_weight: 1.0,
        }
    }
}

/// Differentiable total plus the detached components for logging.
#[derive(Debug, Clone)]
pub struct Loss {
    pub total: Tensor,
    pub arc: f32,
    pub label: f32,
}

impl TrainingObjective {
    /// Combines both losses. Label scores must come from gold pairs.
    pub fn compute(
        &self,
        arc_scores: &Tensor,
        label_scores: &Tensor,
        pairs: &PairIndex,
        gold_labels: &Tensor,
    ) -> Result<Loss> {
        if pairs.is_empty() {
            return Err(KakariError::Shape {
                expected: 1,
                actual: "a batch without tokens".into(),
            });
        }
        let arc = arc_loss(arc_scores, pairs)?;
        let label = label_loss(label_scores, gold_labels)?;

        let arc_value = finite(&arc, "arc loss")?;
        let label_value = finite(&label, "label loss")?;

        let total = (arc.affine(self.arc_weight, 0.0)? + label.affine(self.label_weight, 0.0)?)?;
        Ok(Loss {
            total,
            arc: arc_value,
            label: label_value,
        })
    }
}

fn finite(loss: &Tensor, context: &str) -> Result<f32> {
    let value = loss.to_scalar::<f32>()?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(KakariError::NumericInstability {
            context: format!("{context} = {value}"),
        })
    }
}
