//! # Biaffine Scoring
//!
//! Arc and label scorers over a padded batch of token representations
//! `(batch, tokens, dim)` where position 0 of every sentence is the root.
//! Padding is masked out of arc scores and never selected as a pair.

pub mod arc;
pub mod label;
pub mod objective;

use candle_core::{Device, Tensor, D};
use candle_nn::Module;

use crate::error::{KakariError, Result};

pub use arc::BiaffineArcScorer;
pub use label::BiaffineLabelScorer;
pub use objective::{arc_loss, label_loss, Loss, TrainingObjective};

/// Additive mask value for impossible arcs (self-loops, padded heads).
pub const MASK_VALUE: f32 = -1e9;

/// Appends a constant 1 along the last dimension.
pub(crate) fn append_ones(xs: &Tensor) -> candle_core::Result<Tensor> {
    let mut shape = xs.dims().to_vec();
    if let Some(last) = shape.last_mut() {
        *last = 1;
    }
    let ones = Tensor::ones(shape, xs.dtype(), xs.device())?;
    Tensor::cat(&[xs, &ones], D::Minus1)
}

/// Linear projection with dropout applied to its input in training mode.
pub(crate) fn project(
    layer: &candle_nn::Linear,
    xs: &Tensor,
    dropout: f32,
    train: bool,
) -> candle_core::Result<Tensor> {
    let xs = if train && dropout > 0.0 {
        candle_nn::ops::dropout(xs, dropout)?
    } else {
        xs.clone()
    };
    layer.forward(&xs)
}

/// `(batch, N, N)` additive mask: `MASK_VALUE` on the diagonal and on head
/// columns beyond each sentence's last token, 0 elsewhere.
pub fn arc_mask(lengths: &[usize], padded_len: usize, device: &Device) -> Result<Tensor> {
    let mut mask = vec![0f32; lengths.len() * padded_len * padded_len];
    for (b, &len) in lengths.iter().enumerate() {
        if len + 1 > padded_len {
            return Err(KakariError::Shape {
                expected: padded_len,
                actual: format!("sentence of {} tokens with root", len + 1),
            });
        }
        let base = b * padded_len * padded_len;
        for dep in 0..padded_len {
            for head in 0..padded_len {
                if head == dep || head > len {
                    mask[base + dep * padded_len + head] = MASK_VALUE;
                }
            }
        }
    }
    Ok(Tensor::from_vec(
        mask,
        (lengths.len(), padded_len, padded_len),
        device,
    )?)
}

/// Flattened positions of the (dependent, head) pairs to score.
///
/// Rows index a `(batch * N, dim)` view of the representations, so only
/// `sum(n_b)` pairs are ever scored for labels.
#[derive(Debug, Clone)]
pub struct PairIndex {
    /// `b * N + i` for every real token `i` of sentence `b`.
    pub dependents: Tensor,
    /// `b * N + head(i)`.
    pub heads: Tensor,
    /// `head(i)` within its sentence; arc-loss targets.
    pub head_positions: Tensor,
    len: usize,
}

impl PairIndex {
    /// `heads[b][i]` is the head of token `i + 1` in sentence `b`.
    pub fn new(heads: &[Vec<usize>], padded_len: usize, device: &Device) -> Result<Self> {
        let total: usize = heads.iter().map(Vec::len).sum();
        let mut dependents = Vec::with_capacity(total);
        let mut head_rows = Vec::with_capacity(total);
        let mut positions = Vec::with_capacity(total);

        for (b, sentence) in heads.iter().enumerate() {
            if sentence.len() + 1 > padded_len {
                return Err(KakariError::Shape {
                    expected: padded_len,
                    actual: format!("sentence of {} tokens with root", sentence.len() + 1),
                });
            }
            let offset = b * padded_len;
            for (i, &head) in sentence.iter().enumerate() {
                if head > sentence.len() {
                    return Err(KakariError::MalformedTree(format!(
                        "head {head} outside sentence of length {}",
                        sentence.len()
                    )));
                }
                dependents.push((offset + i + 1) as u32);
                head_rows.push((offset + head) as u32);
                positions.push(head as u32);
            }
        }

        Ok(Self {
            dependents: Tensor::from_vec(dependents, total, device)?,
            heads: Tensor::from_vec(head_rows, total, device)?,
            head_positions: Tensor::from_vec(positions, total, device)?,
            len: total,
        })
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Label ids as a `u32` tensor aligned with a [`PairIndex`].
pub fn label_targets(labels: &[Vec<usize>], device: &Device) -> Result<Tensor> {
    let flat: Vec<u32> = labels.iter().flatten().map(|&l| l as u32).collect();
    let len = flat.len();
    Ok(Tensor::from_vec(flat, len, device)?)
}
