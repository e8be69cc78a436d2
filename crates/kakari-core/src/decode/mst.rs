//! # Chu–Liu/Edmonds Maximum Spanning Arborescence
//!
//! Cycle contraction is driven by an explicit stack of [`Contraction`]
//! frames instead of recursion. Every contraction removes at least one node,
//! so a sentence of `n` tokens needs at most `n - 1` of them.
//!
//! Ties are resolved toward the lowest index at every step: best heads,
//! cycle discovery order, entering edges and leaving edges.

use crate::decode::greedy::best_head;
use crate::error::{KakariError, Result};
use crate::types::ArcScores;

/// Bookkeeping needed to expand the solution of a contracted graph.
struct Contraction {
    /// Best head of every node at this level (`heads[0]` unused).
    heads: Vec<usize>,
    in_cycle: Vec<bool>,
    /// Node at this level -> node in the contracted graph.
    to_contracted: Vec<usize>,
    /// Non-cycle node in the contracted graph -> node at this level.
    from_contracted: Vec<usize>,
    /// Index of the node standing for the whole cycle.
    cycle_node: usize,
    /// For a head outside the cycle: the cycle member its best entering arc reaches.
    entered_at: Vec<usize>,
    /// For a dependent outside the cycle: the cycle member that serves as its head.
    left_from: Vec<usize>,
}

impl Contraction {
    /// Collapses `cycle` into a single node, returning the frame and the
    /// contracted score matrix.
    fn new(graph: &ArcScores, heads: Vec<usize>, cycle: &[usize]) -> (Self, ArcScores) {
        let size = graph.size();
        let mut in_cycle = vec![false; size];
        for &v in cycle {
            in_cycle[v] = true;
        }

        let from_contracted: Vec<usize> = (0..size).filter(|&v| !in_cycle[v]).collect();
        let cycle_node = from_contracted.len();
        let mut to_contracted = vec![cycle_node; size];
        for (new, &old) in from_contracted.iter().enumerate() {
            to_contracted[old] = new;
        }

        let first = cycle[0];
        let mut entered_at = vec![first; size];
        let mut left_from = vec![first; size];
        let mut contracted = ArcScores::filled(cycle_node + 1, f32::NEG_INFINITY);

        for dep in 1..size {
            for head in 0..size {
                if head == dep {
                    continue;
                }
                let score = graph.get(dep, head);
                if score == f32::NEG_INFINITY {
                    continue;
                }
                match (in_cycle[dep], in_cycle[head]) {
                    (false, false) => {
                        contracted.set(to_contracted[dep], to_contracted[head], score);
                    }
                    (true, false) => {
                        // Entering the cycle replaces the arc dep currently takes.
                        let adjusted = score - graph.get(dep, heads[dep]);
                        let new_head = to_contracted[head];
                        if adjusted > contracted.get(cycle_node, new_head) {
                            contracted.set(cycle_node, new_head, adjusted);
                            entered_at[head] = dep;
                        }
                    }
                    (false, true) => {
                        let new_dep = to_contracted[dep];
                        if score > contracted.get(new_dep, cycle_node) {
                            contracted.set(new_dep, cycle_node, score);
                            left_from[dep] = head;
                        }
                    }
                    (true, true) => {}
                }
            }
        }

        let frame = Self {
            heads,
            in_cycle,
            to_contracted,
            from_contracted,
            cycle_node,
            entered_at,
            left_from,
        };
        (frame, contracted)
    }

    /// Maps heads of the contracted graph back to this level, breaking the
    /// cycle at the member reached by the chosen entering arc.
    fn expand(&self, solution: &[usize]) -> Vec<usize> {
        let size = self.heads.len();
        let mut heads = vec![0; size];
        for v in 1..size {
            heads[v] = if self.in_cycle[v] {
                self.heads[v]
            } else {
                let head = solution[self.to_contracted[v]];
                if head == self.cycle_node {
                    self.left_from[v]
                } else {
                    self.from_contracted[head]
                }
            };
        }

        let entering = self.from_contracted[solution[self.cycle_node]];
        heads[self.entered_at[entering]] = entering;
        heads
    }
}

/// Best head of every node (index 0 holds a placeholder for the root).
fn best_heads(graph: &ArcScores) -> Vec<usize> {
    let mut heads = vec![0; graph.size()];
    for (dep, head) in heads.iter_mut().enumerate().skip(1) {
        *head = best_head(graph.row(dep), dep);
    }
    heads
}

/// First cycle found when walking head chains from nodes in ascending order.
fn find_cycle(heads: &[usize]) -> Option<Vec<usize>> {
    let size = heads.len();
    // 0 = unvisited, 1 = on the current walk, 2 = done
    let mut state = vec![0u8; size];
    state[0] = 2;
    for start in 1..size {
        let mut walk = Vec::new();
        let mut node = start;
        while state[node] == 0 {
            state[node] = 1;
            walk.push(node);
            node = heads[node];
        }
        if state[node] == 1 {
            let pos = walk.iter().position(|&v| v == node).unwrap_or(0);
            let mut cycle = walk.split_off(pos);
            cycle.sort_unstable();
            return Some(cycle);
        }
        for v in walk {
            state[v] = 2;
        }
    }
    None
}

/// Maximum spanning arborescence rooted at node 0.
///
/// Returns heads for tokens `1..=n`.
pub fn chu_liu_edmonds(scores: &ArcScores) -> Result<Vec<usize>> {
    chu_liu_edmonds_bounded(scores, scores.sentence_len())
}

/// Fails with [`KakariError::Decode`] instead of performing more than
/// `max_contractions` contractions.
fn chu_liu_edmonds_bounded(scores: &ArcScores, max_contractions: usize) -> Result<Vec<usize>> {
    let length = scores.sentence_len();
    if length == 0 {
        return Ok(Vec::new());
    }

    let mut stack: Vec<Contraction> = Vec::new();
    let mut graph = scores.clone();
    let mut heads = loop {
        let heads = best_heads(&graph);
        let Some(cycle) = find_cycle(&heads) else {
            break heads;
        };
        if stack.len() >= max_contractions {
            tracing::error!(
                length,
                contractions = stack.len(),
                "cycle contraction exceeded its bound"
            );
            return Err(KakariError::Decode {
                length,
                iterations: stack.len(),
            });
        }
        let (frame, contracted) = Contraction::new(&graph, heads, &cycle);
        stack.push(frame);
        graph = contracted;
    };

    while let Some(frame) = stack.pop() {
        heads = frame.expand(&heads);
    }
    heads.remove(0);
    Ok(heads)
}
