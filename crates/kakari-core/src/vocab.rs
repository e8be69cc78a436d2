//! # Vocabularies
//!
//! Closed string-to-id maps built once from the training corpus and never
//! mutated afterward. Word and tag vocabularies reserve padding, unknown and
//! root entries; the label vocabulary is exactly the set of gold relations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{KakariError, Result};
use crate::types::{Sentence, ROOT_FORM, ROOT_TAG};

pub const PAD: &str = "<PAD>";
pub const UNK: &str = "<UNK>";

pub const PAD_ID: usize = 0;
pub const UNK_ID: usize = 1;
pub const ROOT_ID: usize = 2;

/// Specials shared by the word and tag vocabularies, in id order.
const INPUT_SPECIALS: [&str; 3] = [PAD, UNK, ROOT_FORM];

/// Lowercases a word form before vocabulary lookup.
pub fn normalize_form(form: &str) -> String {
    if form == ROOT_FORM {
        form.to_string()
    } else {
        form.to_lowercase()
    }
}

/// Frequency-counting builder for a [`Vocabulary`].
#[derive(Debug, Clone, Default)]
pub struct VocabularyBuilder {
    specials: Vec<String>,
    counts: HashMap<String, usize>,
}

impl VocabularyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder whose vocabulary starts with `specials` at ids `0..specials.len()`.
    pub fn with_specials(specials: &[&str]) -> Self {
        Self {
            specials: specials.iter().map(|s| s.to_string()).collect(),
            counts: HashMap::new(),
        }
    }

    pub fn add(&mut self, token: &str) {
        *self.counts.entry(token.to_string()).or_insert(0) += 1;
    }

    /// Freezes the vocabulary. Non-special entries seen fewer than
    /// `min_count` times are dropped; the rest are ordered by descending
    /// frequency, then lexicographically.
    pub fn build(self, min_count: usize) -> Vocabulary {
        let mut entries: Vec<(String, usize)> = self
            .counts
            .into_iter()
            .filter(|(token, count)| *count >= min_count && !self.specials.contains(token))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut tokens = self.specials;
        tokens.extend(entries.into_iter().map(|(token, _)| token));
        Vocabulary::from(tokens)
    }
}

/// Immutable bidirectional string/id map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, usize>,
}

impl From<Vec<String>> for Vocabulary {
    fn from(tokens: Vec<String>) -> Self {
        let index = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self { tokens, index }
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.tokens
    }
}

impl Vocabulary {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn id(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    /// Id of `token`, or [`UNK_ID`] when absent.
    pub fn id_or_unk(&self, token: &str) -> usize {
        self.id(token).unwrap_or(UNK_ID)
    }

    /// Id of a relation label that must be in the vocabulary.
    pub fn require(&self, label: &str) -> Result<usize> {
        self.id(label).ok_or_else(|| KakariError::UnknownLabel {
            label: label.to_string(),
        })
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.tokens.get(id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }
}

/// The word, tag and label vocabularies of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabularies {
    pub words: Vocabulary,
    pub tags: Vocabulary,
    pub labels: Vocabulary,
}

impl Vocabularies {
    /// Builds all three vocabularies from a training corpus.
    ///
    /// `extra_words` (typically the rows of a pretrained embedding file) are
    /// admitted regardless of `min_word_count`.
    pub fn from_corpus(
        sentences: &[Sentence],
        min_word_count: usize,
        extra_words: &[String],
    ) -> Result<Self> {
        let mut words = VocabularyBuilder::with_specials(&INPUT_SPECIALS);
        let mut tags = VocabularyBuilder::with_specials(&INPUT_SPECIALS);
        let mut labels = VocabularyBuilder::new();

        for sentence in sentences {
            for token in sentence.words() {
                words.add(&normalize_form(&token.form));
                if let Some(tag) = token.tag() {
                    tags.add(tag);
                }
                let label = token.deprel.as_deref().ok_or_else(|| {
                    KakariError::MalformedTree(format!(
                        "token {} ({:?}) has no relation label",
                        token.id, token.form
                    ))
                })?;
                labels.add(label);
            }
        }
        for word in extra_words {
            for _ in 0..min_word_count.max(1) {
                words.add(&normalize_form(word));
            }
        }

        let vocabs = Self {
            words: words.build(min_word_count),
            tags: tags.build(1),
            labels: labels.build(1),
        };
        tracing::info!(
            words = vocabs.words.len(),
            tags = vocabs.tags.len(),
            labels = vocabs.labels.len(),
            "built vocabularies"
        );
        Ok(vocabs)
    }

    /// Word ids for every token including the root.
    pub fn encode_words(&self, sentence: &Sentence) -> Vec<u32> {
        sentence
            .tokens()
            .iter()
            .map(|t| self.words.id_or_unk(&normalize_form(&t.form)) as u32)
            .collect()
    }

    /// Tag ids for every token including the root.
    pub fn encode_tags(&self, sentence: &Sentence) -> Vec<u32> {
        sentence
            .tokens()
            .iter()
            .map(|t| match t.tag() {
                Some(ROOT_TAG) if t.id == 0 => ROOT_ID as u32,
                Some(tag) => self.tags.id_or_unk(tag) as u32,
                None => UNK_ID as u32,
            })
            .collect()
    }

    /// Gold label ids for tokens `1..=n`; unknown labels are an error.
    pub fn encode_labels(&self, sentence: &Sentence) -> Result<Vec<usize>> {
        sentence
            .words()
            .iter()
            .map(|t| match t.deprel.as_deref() {
                Some(label) => self.labels.require(label),
                None => Err(KakariError::MalformedTree(format!(
                    "token {} has no relation label",
                    t.id
                ))),
            })
            .collect()
    }
}
