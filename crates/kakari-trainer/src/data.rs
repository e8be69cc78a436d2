//! Corpus loading, pretrained embeddings and token-budget batching.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::Context;
use candle_core::{Device, Tensor};
use kakari_core::vocab::{normalize_form, PAD_ID};
use kakari_core::{read_conll, KakariError, Sentence, Vocabularies, Vocabulary};

/// Reads a CoNLL corpus and checks that every gold tree is well formed.
///
/// With a `cache_dir`, the parsed corpus is stored as JSON keyed by the
/// source file's name, size and modification time, and reused on later runs.
pub fn load_corpus(path: &Path, cache_dir: Option<&Path>) -> anyhow::Result<Vec<Sentence>> {
    let cache = match cache_dir {
        Some(dir) => Some(cache_path(path, dir)?),
        None => None,
    };

    if let Some(cache) = cache.as_ref().filter(|c| c.exists()) {
        let file = File::open(cache)?;
        match serde_json::from_reader::<_, Vec<Sentence>>(BufReader::new(file)) {
            Ok(sentences) => {
                tracing::info!(cache = %cache.display(), sentences = sentences.len(), "loaded corpus from cache");
                return Ok(sentences);
            }
            Err(e) => tracing::warn!(cache = %cache.display(), error = %e, "ignoring unreadable corpus cache"),
        }
    }

    let sentences =
        read_conll(path).with_context(|| format!("failed to read corpus {}", path.display()))?;
    for (i, sentence) in sentences.iter().enumerate() {
        sentence
            .validate_tree()
            .with_context(|| format!("sentence {} of {}", i + 1, path.display()))?;
    }
    tracing::info!(path = %path.display(), sentences = sentences.len(), "loaded corpus");

    if let Some(cache) = cache {
        if let Some(parent) = cache.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&cache)?);
        serde_json::to_writer(writer, &sentences)?;
        tracing::debug!(cache = %cache.display(), "wrote corpus cache");
    }
    Ok(sentences)
}

fn cache_path(path: &Path, dir: &Path) -> anyhow::Result<PathBuf> {
    let meta = fs::metadata(path).with_context(|| format!("cannot stat {}", path.display()))?;
    let mtime = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "corpus".to_string());
    Ok(dir.join(format!("{name}-{}-{mtime}.json", meta.len())))
}

/// Word vectors from a word2vec/GloVe text file.
#[derive(Debug, Clone)]
pub struct PretrainedEmbeddings {
    dim: usize,
    index: HashMap<String, usize>,
    words: Vec<String>,
    vectors: Vec<f32>,
}

impl PretrainedEmbeddings {
    /// Parses `word v1 ... vd` rows, with an optional `count dim` header.
    /// Words are normalized like vocabulary entries; the first row wins.
    pub fn parse<R: BufRead>(reader: R) -> kakari_core::Result<Self> {
        let mut dim = None;
        let mut index = HashMap::new();
        let mut words = Vec::new();
        let mut vectors = Vec::new();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if i == 0 && fields.len() == 2 && fields.iter().all(|f| f.parse::<usize>().is_ok()) {
                dim = fields[1].parse().ok();
                continue;
            }

            let values = fields[1..]
                .iter()
                .map(|v| v.parse::<f32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| KakariError::Embedding(format!("line {}: {e}", i + 1)))?;
            let expected = *dim.get_or_insert(values.len());
            if values.len() != expected || expected == 0 {
                return Err(KakariError::Embedding(format!(
                    "line {}: expected {expected} dimensions, found {}",
                    i + 1,
                    values.len()
                )));
            }

            let word = normalize_form(fields[0]);
            if index.contains_key(&word) {
                continue;
            }
            index.insert(word.clone(), words.len());
            words.push(word);
            vectors.extend(values);
        }

        match dim {
            Some(dim) if !words.is_empty() => Ok(Self {
                dim,
                index,
                words,
                vectors,
            }),
            _ => Err(KakariError::Embedding("no vectors found".into())),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open embedding file {}", path.display()))?;
        let embeddings = Self::parse(BufReader::new(file))?;
        tracing::info!(
            path = %path.display(),
            words = embeddings.len(),
            dim = embeddings.dim,
            "loaded pretrained embeddings"
        );
        Ok(embeddings)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn get(&self, word: &str) -> Option<&[f32]> {
        self.index
            .get(word)
            .map(|&row| &self.vectors[row * self.dim..(row + 1) * self.dim])
    }

    /// Copies the vectors of every vocabulary word found here into a
    /// row-major `(vocab.len(), dim)` table. Returns the number of rows set.
    pub fn overlay(&self, table: &mut [f32], vocab: &Vocabulary) -> kakari_core::Result<usize> {
        if table.len() != vocab.len() * self.dim {
            return Err(KakariError::Embedding(format!(
                "embedding table holds {} values, expected {} rows of {}",
                table.len(),
                vocab.len(),
                self.dim
            )));
        }
        let mut hits = 0;
        for (id, word) in vocab.iter().enumerate() {
            if let Some(vector) = self.get(word) {
                table[id * self.dim..(id + 1) * self.dim].copy_from_slice(vector);
                hits += 1;
            }
        }
        Ok(hits)
    }
}

/// A sentence mapped to vocabulary ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSentence {
    /// Word ids, root included.
    pub words: Vec<u32>,
    /// Tag ids, root included.
    pub tags: Vec<u32>,
    /// Gold heads of tokens `1..=n`; empty when not annotated.
    pub heads: Vec<usize>,
    /// Gold label ids of tokens `1..=n`; empty when not annotated.
    pub labels: Vec<usize>,
}

impl EncodedSentence {
    /// Encodes a gold-annotated sentence. Unknown labels are an error.
    pub fn with_gold(vocabs: &Vocabularies, sentence: &Sentence) -> kakari_core::Result<Self> {
        let heads = sentence.gold_heads().ok_or_else(|| {
            KakariError::MalformedTree(format!("sentence {:?} has no gold heads", sentence.to_string()))
        })?;
        Ok(Self {
            words: vocabs.encode_words(sentence),
            tags: vocabs.encode_tags(sentence),
            heads,
            labels: vocabs.encode_labels(sentence)?,
        })
    }

    /// Encodes the input side only.
    pub fn without_gold(vocabs: &Vocabularies, sentence: &Sentence) -> Self {
        Self {
            words: vocabs.encode_words(sentence),
            tags: vocabs.encode_tags(sentence),
            heads: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Number of words, root excluded.
    pub fn len(&self) -> usize {
        self.words.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_gold(&self) -> bool {
        !self.heads.is_empty() && self.heads.len() == self.len()
    }
}

/// Groups sentences into mini-batches whose total token count (root
/// included) stays within a budget. A sentence longer than the budget on
/// its own becomes a singleton batch.
#[derive(Debug, Clone)]
pub struct Batcher {
    budget: usize,
}

impl Batcher {
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.max(1),
        }
    }

    /// Index groups over `sizes` (tokens per sentence, root included). Order
    /// follows the corpus unless an `rng` is given.
    pub fn batches(&self, sizes: &[usize], rng: Option<&mut oorandom::Rand32>) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..sizes.len()).collect();
        if let Some(rng) = rng {
            for i in (1..order.len()).rev() {
                let j = rng.rand_range(0..(i as u32 + 1)) as usize;
                order.swap(i, j);
            }
        }

        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut tokens = 0;
        for idx in order {
            let size = sizes[idx];
            if !current.is_empty() && tokens + size > self.budget {
                batches.push(std::mem::take(&mut current));
                tokens = 0;
            }
            current.push(idx);
            tokens += size;
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}

/// A padded mini-batch ready for the encoder.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Positions of the batch's sentences in the corpus.
    pub indices: Vec<usize>,
    /// `(batch, N)` word ids, `<PAD>` beyond each sentence.
    pub words: Tensor,
    /// `(batch, N)` tag ids.
    pub tags: Tensor,
    /// Words per sentence, root excluded.
    pub lengths: Vec<usize>,
    pub heads: Vec<Vec<usize>>,
    pub labels: Vec<Vec<usize>>,
}

impl Batch {
    pub fn new(
        corpus: &[EncodedSentence],
        indices: &[usize],
        device: &Device,
    ) -> kakari_core::Result<Self> {
        let padded_len = indices
            .iter()
            .map(|&i| corpus[i].words.len())
            .max()
            .unwrap_or(1);
        let mut words = vec![PAD_ID as u32; indices.len() * padded_len];
        let mut tags = vec![PAD_ID as u32; indices.len() * padded_len];
        for (b, &i) in indices.iter().enumerate() {
            let sentence = &corpus[i];
            let row = b * padded_len;
            words[row..row + sentence.words.len()].copy_from_slice(&sentence.words);
            tags[row..row + sentence.tags.len()].copy_from_slice(&sentence.tags);
        }

        let shape = (indices.len(), padded_len);
        Ok(Self {
            indices: indices.to_vec(),
            words: Tensor::from_vec(words, shape, device)?,
            tags: Tensor::from_vec(tags, shape, device)?,
            lengths: indices.iter().map(|&i| corpus[i].len()).collect(),
            heads: indices.iter().map(|&i| corpus[i].heads.clone()).collect(),
            labels: indices.iter().map(|&i| corpus[i].labels.clone()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Tokens per row, root and padding included.
    pub fn padded_len(&self) -> usize {
        self.words.dims().get(1).copied().unwrap_or(0)
    }

    /// Real tokens in the batch, root excluded.
    pub fn num_tokens(&self) -> usize {
        self.lengths.iter().sum()
    }

    pub fn has_gold(&self) -> bool {
        self.heads
            .iter()
            .zip(&self.lengths)
            .all(|(heads, &len)| heads.len() == len)
    }
}
