use crate::types::ArcScores;

/// Index of the best candidate head for `dependent`, excluding itself.
/// Ties go to the lowest head index.
pub(crate) fn best_head(row: &[f32], dependent: usize) -> usize {
    let mut best = None;
    let mut best_score = f32::NEG_INFINITY;
    for (head, &score) in row.iter().enumerate() {
        if head == dependent {
            continue;
        }
        if best.is_none() || score > best_score {
            best = Some(head);
            best_score = score;
        }
    }
    best.unwrap_or(0)
}

/// Per-token argmax over candidate heads.
///
/// Returns heads for tokens `1..=n`. The result may contain cycles and
/// several root attachments.
pub fn greedy_heads(scores: &ArcScores) -> Vec<usize> {
    (1..scores.size())
        .map(|dependent| best_head(scores.row(dependent), dependent))
        .collect()
}
