use candle_core::Tensor;

use crate::error::{KakariError, Result};

/// Square arc score matrix for one sentence, indexed `[dependent][head]`.
///
/// Side length is `n + 1` where `n` is the sentence length without the root.
/// `f32::NEG_INFINITY` marks an absent edge; NaN and `+inf` are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct ArcScores {
    size: usize,
    data: Vec<f32>,
}

impl ArcScores {
    /// Builds a matrix from row vectors, validating squareness and finiteness.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let size = rows.len();
        let mut data = Vec::with_capacity(size * size);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != size {
                return Err(KakariError::Shape {
                    expected: size,
                    actual: format!("row {i} of length {}", row.len()),
                });
            }
            data.extend(row);
        }
        Self::from_flat(size, data)
    }

    /// Builds a matrix from row-major data of length `size * size`.
    pub fn from_flat(size: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != size * size {
            return Err(KakariError::Shape {
                expected: size,
                actual: format!("{} values", data.len()),
            });
        }
        if let Some(pos) = data.iter().position(|v| v.is_nan() || *v == f32::INFINITY) {
            return Err(KakariError::NumericInstability {
                context: format!(
                    "arc score [{}][{}] = {}",
                    pos / size,
                    pos % size,
                    data[pos]
                ),
            });
        }
        Ok(Self { size, data })
    }

    /// Extracts the `(len+1)×(len+1)` top-left block of a padded `(N, N)`
    /// score tensor.
    pub fn from_tensor(scores: &Tensor, sentence_len: usize) -> Result<Self> {
        let (rows, cols) = scores.dims2()?;
        let size = sentence_len + 1;
        if rows < size || cols < size {
            return Err(KakariError::Shape {
                expected: size,
                actual: format!("{rows}x{cols}"),
            });
        }
        let block = scores.narrow(0, 0, size)?.narrow(1, 0, size)?;
        let data = block.flatten_all()?.to_vec1::<f32>()?;
        Self::from_flat(size, data)
    }

    /// Matrix of side `size` with every entry set to `value`.
    pub(crate) fn filled(size: usize, value: f32) -> Self {
        Self {
            size,
            data: vec![value; size * size],
        }
    }

    /// Side length (`n + 1`).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Sentence length without the root.
    pub fn sentence_len(&self) -> usize {
        self.size.saturating_sub(1)
    }

    /// Score of `dependent` attaching to `head`.
    #[inline]
    pub fn get(&self, dependent: usize, head: usize) -> f32 {
        self.data[dependent * self.size + head]
    }

    /// Row of scores for one dependent over all candidate heads.
    pub fn row(&self, dependent: usize) -> &[f32] {
        &self.data[dependent * self.size..(dependent + 1) * self.size]
    }

    /// Overwrites one entry.
    pub fn set(&mut self, dependent: usize, head: usize, score: f32) {
        self.data[dependent * self.size + head] = score;
    }

    /// Sum of the scores of the arcs in `heads` (heads of tokens `1..=n`).
    pub fn tree_score(&self, heads: &[usize]) -> f32 {
        heads
            .iter()
            .enumerate()
            .map(|(i, &h)| self.get(i + 1, h))
            .sum()
    }

    /// Fails with a shape error unless the matrix fits `sentence_len`.
    pub fn ensure_len(&self, sentence_len: usize) -> Result<()> {
        if self.size != sentence_len + 1 {
            return Err(KakariError::Shape {
                expected: sentence_len + 1,
                actual: format!("{0}x{0}", self.size),
            });
        }
        Ok(())
    }
}
