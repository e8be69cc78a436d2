use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KakariError, Result};

/// Surface form of the synthetic root token.
pub const ROOT_FORM: &str = "<ROOT>";
/// Part-of-speech tag assigned to the synthetic root token.
pub const ROOT_TAG: &str = "ROOT";
/// Relation label carried by the synthetic root token.
pub const ROOT_RELATION: &str = "root";

/// A single token with the ten CoNLL-U columns.
///
/// Empty columns (`_` in the file) are stored as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// 1-based position in the sentence (0 for the root).
    pub id: usize,
    /// Surface form.
    pub form: String,
    pub lemma: Option<String>,
    /// Universal part-of-speech tag.
    pub upos: Option<String>,
    /// Language-specific part-of-speech tag.
    pub xpos: Option<String>,
    pub feats: Option<String>,
    /// Gold (or predicted) head index.
    pub head: Option<usize>,
    /// Gold (or predicted) relation label.
    pub deprel: Option<String>,
    pub deps: Option<String>,
    pub misc: Option<String>,
}

impl Token {
    /// Creates a token with only id and form set.
    #[must_use]
    pub fn new(id: usize, form: impl Into<String>) -> Self {
        Self {
            id,
            form: form.into(),
            lemma: None,
            upos: None,
            xpos: None,
            feats: None,
            head: None,
            deprel: None,
            deps: None,
            misc: None,
        }
    }

    /// Sets the gold head and relation.
    #[must_use]
    pub fn with_arc(mut self, head: usize, deprel: impl Into<String>) -> Self {
        self.head = Some(head);
        self.deprel = Some(deprel.into());
        self
    }

    /// Sets the universal part-of-speech tag.
    #[must_use]
    pub fn with_upos(mut self, upos: impl Into<String>) -> Self {
        self.upos = Some(upos.into());
        self
    }

    /// The synthetic root token.
    #[must_use]
    pub fn root() -> Self {
        Self {
            id: 0,
            form: ROOT_FORM.to_string(),
            lemma: Some(ROOT_FORM.to_string()),
            upos: Some(ROOT_TAG.to_string()),
            xpos: Some(ROOT_TAG.to_string()),
            feats: None,
            head: Some(0),
            deprel: Some(ROOT_RELATION.to_string()),
            deps: None,
            misc: None,
        }
    }

    /// Tag used as model input: UPOS, falling back to XPOS.
    pub fn tag(&self) -> Option<&str> {
        self.upos.as_deref().or(self.xpos.as_deref())
    }
}

/// A sentence with the synthetic root token prepended at index 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    tokens: Vec<Token>,
}

impl Sentence {
    /// Builds a sentence from its words; the root token is prepended and
    /// token ids are renumbered `1..=n`.
    #[must_use]
    pub fn new(words: Vec<Token>) -> Self {
        let mut tokens = Vec::with_capacity(words.len() + 1);
        tokens.push(Token::root());
        for (i, mut token) in words.into_iter().enumerate() {
            token.id = i + 1;
            tokens.push(token);
        }
        Self { tokens }
    }

    /// Number of words, root excluded.
    pub fn len(&self) -> usize {
        self.tokens.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tokens including the root at index 0.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Words only (root excluded).
    pub fn words(&self) -> &[Token] {
        &self.tokens[1..]
    }

    pub fn words_mut(&mut self) -> &mut [Token] {
        &mut self.tokens[1..]
    }

    /// Gold heads for tokens `1..=n`, or `None` if any token is unannotated.
    pub fn gold_heads(&self) -> Option<Vec<usize>> {
        self.words().iter().map(|t| t.head).collect()
    }

    /// Gold relation labels for tokens `1..=n`, or `None` if any is missing.
    pub fn gold_labels(&self) -> Option<Vec<&str>> {
        self.words().iter().map(|t| t.deprel.as_deref()).collect()
    }

    /// Checks that the gold heads form a tree rooted at 0.
    pub fn validate_tree(&self) -> Result<()> {
        let heads = self.gold_heads().ok_or_else(|| {
            KakariError::MalformedTree("sentence has tokens without a head".into())
        })?;
        check_tree(&heads)
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let forms: Vec<&str> = self.words().iter().map(|t| t.form.as_str()).collect();
        write!(f, "{}", forms.join(" "))
    }
}

/// Verifies that `heads` (for tokens `1..=n`) describes a spanning tree
/// rooted at 0: every head in range, no self-loops, no cycles.
pub fn check_tree(heads: &[usize]) -> Result<()> {
    let n = heads.len();
    for (i, &h) in heads.iter().enumerate() {
        let dependent = i + 1;
        if h > n {
            return Err(KakariError::MalformedTree(format!(
                "token {dependent} has head {h} outside 0..={n}"
            )));
        }
        if h == dependent {
            return Err(KakariError::MalformedTree(format!(
                "token {dependent} is its own head"
            )));
        }
    }

    // 0 = unvisited, 1 = on current path, 2 = reaches root
    let mut state = vec![0u8; n + 1];
    state[0] = 2;
    for start in 1..=n {
        let mut path = Vec::new();
        let mut node = start;
        while state[node] == 0 {
            state[node] = 1;
            path.push(node);
            node = heads[node - 1];
        }
        if state[node] == 1 {
            return Err(KakariError::MalformedTree(format!(
                "cycle through token {node}"
            )));
        }
        for visited in path {
            state[visited] = 2;
        }
    }
    Ok(())
}
