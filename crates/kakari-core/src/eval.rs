//! # Attachment Score Evaluation
//!
//! UAS and LAS over a corpus pass, with optional punctuation exclusion.
//! Only trees from well-formed decoding are accepted, so the numbers stay
//! comparable with the standard protocol.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KakariError, Result};
use crate::types::{DecodeMode, PredictedTree, Sentence, Token};
use crate::vocab::Vocabulary;

/// Tags treated as punctuation by default (UPOS and PTB).
pub const DEFAULT_PUNCT_TAGS: &[&str] = &["PUNCT", "``", "''", ",", ".", ":"];

/// Decides which tokens are excluded from scoring.
#[derive(Debug, Clone)]
pub struct PunctPolicy {
    tags: HashSet<String>,
    form: Regex,
}

impl PunctPolicy {
    pub fn new(tags: &[&str]) -> Result<Self> {
        Ok(Self {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            form: Regex::new(r"^\p{P}+$")?,
        })
    }

    /// A token is punctuation if its UPOS or XPOS is a punctuation tag, or,
    /// when it carries no tag at all, if its form is only punctuation.
    pub fn is_punct(&self, token: &Token) -> bool {
        let tags = [token.upos.as_deref(), token.xpos.as_deref()];
        if tags.iter().all(Option::is_none) {
            return self.form.is_match(&token.form);
        }
        tags.iter().flatten().any(|t| self.tags.contains(*t))
    }
}

/// Token counts behind UAS and LAS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentScores {
    /// Tokens with the correct head.
    pub unlabeled: usize,
    /// Tokens with the correct head and label.
    pub labeled: usize,
    /// Tokens scored.
    pub total: usize,
}

impl AttachmentScores {
    /// Unlabeled attachment score in percent (0.0 when nothing was scored).
    pub fn uas(&self) -> f64 {
        percent(self.unlabeled, self.total)
    }

    /// Labeled attachment score in percent (0.0 when nothing was scored).
    pub fn las(&self) -> f64 {
        percent(self.labeled, self.total)
    }

    pub fn merge(&mut self, other: AttachmentScores) {
        self.unlabeled += other.unlabeled;
        self.labeled += other.labeled;
        self.total += other.total;
    }
}

impl fmt::Display for AttachmentScores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UAS: {:.2}, LAS: {:.2} ({} tokens)",
            self.uas(),
            self.las(),
            self.total
        )
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Accumulates attachment scores over a corpus.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    punct: Option<PunctPolicy>,
    scores: AttachmentScores,
}

impl Evaluator {
    /// Evaluator scoring every token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluator that skips tokens matching `policy`.
    pub fn ignoring_punct(policy: PunctPolicy) -> Self {
        Self {
            punct: Some(policy),
            scores: AttachmentScores::default(),
        }
    }

    /// Scores accumulated so far.
    pub fn scores(&self) -> AttachmentScores {
        self.scores
    }

    pub fn reset(&mut self) {
        self.scores = AttachmentScores::default();
    }

    /// Adds one predicted tree. Trees from greedy decoding are rejected.
    pub fn evaluate(
        &mut self,
        gold: &Sentence,
        predicted: &PredictedTree,
        labels: &Vocabulary,
    ) -> Result<AttachmentScores> {
        if predicted.mode() != DecodeMode::WellFormed {
            return Err(KakariError::NonComparableDecode(predicted.mode().as_str()));
        }
        check_lengths(gold, predicted.len())?;

        self.accumulate(gold, |i, token| {
            let head = predicted.heads()[i];
            let label = labels.token(predicted.labels()[i]);
            (token.head == Some(head), label.is_some() && label == token.deprel.as_deref())
        })
    }

    /// Adds a system-annotated sentence, comparing heads and label strings.
    pub fn evaluate_sentences(&mut self, gold: &Sentence, system: &Sentence) -> Result<AttachmentScores> {
        check_lengths(gold, system.len())?;
        let system = system.words();
        self.accumulate(gold, |i, token| {
            let head_ok = token.head.is_some() && token.head == system[i].head;
            (head_ok, token.deprel.is_some() && token.deprel == system[i].deprel)
        })
    }

    fn accumulate(
        &mut self,
        gold: &Sentence,
        judge: impl Fn(usize, &Token) -> (bool, bool),
    ) -> Result<AttachmentScores> {
        if gold.gold_heads().is_none() {
            return Err(KakariError::MalformedTree(format!(
                "gold sentence {:?} has unannotated tokens",
                gold.to_string()
            )));
        }

        let mut sentence = AttachmentScores::default();
        for (i, token) in gold.words().iter().enumerate() {
            if self.punct.as_ref().is_some_and(|p| p.is_punct(token)) {
                continue;
            }
            let (head_ok, label_ok) = judge(i, token);
            sentence.total += 1;
            if head_ok {
                sentence.unlabeled += 1;
                if label_ok {
                    sentence.labeled += 1;
                }
            }
        }
        self.scores.merge(sentence);
        Ok(sentence)
    }
}

fn check_lengths(gold: &Sentence, predicted: usize) -> Result<()> {
    if gold.len() != predicted {
        return Err(KakariError::Shape {
            expected: gold.len() + 1,
            actual: format!("prediction for {predicted} tokens"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::VocabularyBuilder;

    fn gold() -> Sentence {
        Sentence::new(vec![
            Token::new(1, "The").with_arc(2, "det").with_upos("DET"),
            Token::new(2, "dog").with_arc(3, "nsubj").with_upos("NOUN"),
            Token::new(3, "barks").with_arc(0, "root").with_upos("VERB"),
            Token::new(4, ".").with_arc(3, "punct").with_upos("PUNCT"),
        ])
    }

    fn labels() -> Vocabulary {
        let mut builder = VocabularyBuilder::new();
        for l in ["det", "nsubj", "root", "punct"] {
            builder.add(l);
        }
        builder.build(1)
    }

    fn ids(labels: &Vocabulary, names: &[&str]) -> Vec<usize> {
        names.iter().map(|n| labels.id(n).unwrap()).collect()
    }

    #[test]
    fn perfect_prediction_scores_100() {
        let labels = labels();
        let tree = PredictedTree::new(
            vec![2, 3, 0, 3],
            ids(&labels, &["det", "nsubj", "root", "punct"]),
            DecodeMode::WellFormed,
        );
        let mut evaluator = Evaluator::new();
        evaluator.evaluate(&gold(), &tree, &labels).unwrap();
        evaluator.evaluate(&gold(), &tree, &labels).unwrap();
        let scores = evaluator.scores();
        assert_eq!(scores.total, 8);
        assert_eq!(scores.uas(), 100.0);
        assert_eq!(scores.las(), 100.0);
    }

    #[test]
    fn all_wrong_heads_score_0() {
        let labels = labels();
        // A valid tree that disagrees with gold on every head.
        let tree = PredictedTree::new(
            vec![0, 1, 4, 2],
            ids(&labels, &["det", "nsubj", "root", "punct"]),
            DecodeMode::WellFormed,
        );
        let mut evaluator = Evaluator::new();
        evaluator.evaluate(&gold(), &tree, &labels).unwrap();
        assert_eq!(evaluator.scores().uas(), 0.0);
        assert_eq!(evaluator.scores().las(), 0.0);
    }

    #[test]
    fn right_head_wrong_label_counts_for_uas_only() {
        let labels = labels();
        let tree = PredictedTree::new(
            vec![2, 3, 0, 3],
            ids(&labels, &["nsubj", "nsubj", "root", "punct"]),
            DecodeMode::WellFormed,
        );
        let mut evaluator = Evaluator::new();
        let scores = evaluator.evaluate(&gold(), &tree, &labels).unwrap();
        assert_eq!(scores.unlabeled, 4);
        assert_eq!(scores.labeled, 3);
    }

    #[test]
    fn punctuation_can_be_excluded() {
        let labels = labels();
        let tree = PredictedTree::new(
            vec![2, 3, 0, 1],
            ids(&labels, &["det", "nsubj", "root", "punct"]),
            DecodeMode::WellFormed,
        );
        let mut evaluator = Evaluator::ignoring_punct(PunctPolicy::new(DEFAULT_PUNCT_TAGS).unwrap());
        let scores = evaluator.evaluate(&gold(), &tree, &labels).unwrap();
        assert_eq!(scores.total, 3);
        assert_eq!(scores.uas(), 100.0);
    }

    #[test]
    fn untagged_punctuation_falls_back_to_form() {
        let policy = PunctPolicy::new(DEFAULT_PUNCT_TAGS).unwrap();
        assert!(policy.is_punct(&Token::new(1, "?!")));
        assert!(!policy.is_punct(&Token::new(1, "dog")));
        assert!(!policy.is_punct(&Token::new(1, "...").with_upos("SYM")));
    }

    #[test]
    fn greedy_trees_are_rejected() {
        let labels = labels();
        let tree = PredictedTree::new(vec![2, 3, 0, 3], vec![0; 4], DecodeMode::Greedy);
        let err = Evaluator::new().evaluate(&gold(), &tree, &labels).unwrap_err();
        assert!(matches!(err, KakariError::NonComparableDecode("greedy")));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let labels = labels();
        let tree = PredictedTree::new(vec![0], vec![0], DecodeMode::WellFormed);
        assert!(Evaluator::new().evaluate(&gold(), &tree, &labels).is_err());
    }

    #[test]
    fn sentence_comparison_uses_label_strings() {
        let mut system = gold();
        system.words_mut()[0].deprel = Some("amod".into());
        system.words_mut()[3].head = Some(1);
        let scores = Evaluator::new().evaluate_sentences(&gold(), &system).unwrap();
        assert_eq!(scores, AttachmentScores { unlabeled: 3, labeled: 2, total: 4 });
    }

    #[test]
    fn empty_pass_reports_zero() {
        let scores = AttachmentScores::default();
        assert_eq!(scores.uas(), 0.0);
        assert_eq!(scores.to_string(), "UAS: 0.00, LAS: 0.00 (0 tokens)");
    }
}
