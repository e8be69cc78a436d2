//! BiLSTM encoder and the full biaffine parser built on it.

use candle_core::{Device, Tensor, D};
use candle_nn::rnn::{lstm, LSTMConfig, LSTM, RNN};
use candle_nn::{Embedding, Module, VarBuilder, VarMap};
use kakari_core::{
    arc_mask, label_targets, ArcScores, BiaffineArcScorer, BiaffineLabelScorer, KakariError, Loss,
    PairIndex, PredictedTree, TrainingObjective, TreeDecoder, Vocabulary,
};

use crate::config::ModelConfig;
use crate::data::{Batch, PretrainedEmbeddings};

/// Source of per-token vectors for a padded batch.
///
/// Position 0 of every row is the root pseudo-token and `lengths[b]` counts
/// the words of row `b`; the output is `(batch, N, output_dim)` and
/// index-aligned with the input ids. Padding must not change the vectors
/// of real tokens.
pub trait RepresentationProvider {
    fn represent(
        &self,
        words: &Tensor,
        tags: &Tensor,
        lengths: &[usize],
        train: bool,
    ) -> candle_core::Result<Tensor>;

    fn output_dim(&self) -> usize;
}

/// Word and tag embeddings followed by stacked bidirectional LSTMs.
pub struct BiLstmEncoder {
    words: Embedding,
    tags: Embedding,
    layers: Vec<(LSTM, LSTM)>,
    hidden: usize,
    dropout: f32,
}

impl BiLstmEncoder {
    pub fn new(
        config: &ModelConfig,
        word_vocab: usize,
        tag_vocab: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let words = candle_nn::embedding(word_vocab, config.word_dim, vb.pp("words"))?;
        let tags = candle_nn::embedding(tag_vocab, config.tag_dim, vb.pp("tags"))?;

        let mut layers = Vec::with_capacity(config.lstm_layers);
        let mut input_dim = config.word_dim + config.tag_dim;
        for layer in 0..config.lstm_layers {
            let vb = vb.pp(format!("lstm{layer}"));
            let forward = lstm(input_dim, config.lstm_hidden, LSTMConfig::default(), vb.pp("fwd"))?;
            let backward = lstm(input_dim, config.lstm_hidden, LSTMConfig::default(), vb.pp("bwd"))?;
            layers.push((forward, backward));
            input_dim = 2 * config.lstm_hidden;
        }

        Ok(Self {
            words,
            tags,
            layers,
            hidden: config.lstm_hidden,
            dropout: config.dropout,
        })
    }

    fn dropout(&self, xs: Tensor, train: bool) -> candle_core::Result<Tensor> {
        if train && self.dropout > 0.0 {
            candle_nn::ops::dropout(&xs, self.dropout)
        } else {
            Ok(xs)
        }
    }
}

/// Flat row indices that reverse positions `0..=len` of every row and leave
/// the padding in place. The permutation is its own inverse.
fn reversal_index(lengths: &[usize], tokens: usize, device: &Device) -> candle_core::Result<Tensor> {
    let mut index = Vec::with_capacity(lengths.len() * tokens);
    for (b, &len) in lengths.iter().enumerate() {
        let offset = b * tokens;
        index.extend((0..tokens).map(|p| {
            let source = if p <= len { len - p } else { p };
            (offset + source) as u32
        }));
    }
    Tensor::from_vec(index, lengths.len() * tokens, device)
}

fn reverse_rows(xs: &Tensor, index: &Tensor) -> candle_core::Result<Tensor> {
    let (batch, tokens, dim) = xs.dims3()?;
    xs.reshape((batch * tokens, dim))?
        .index_select(index, 0)?
        .reshape((batch, tokens, dim))
}

impl RepresentationProvider for BiLstmEncoder {
    fn represent(
        &self,
        words: &Tensor,
        tags: &Tensor,
        lengths: &[usize],
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let embedded = Tensor::cat(&[self.words.forward(words)?, self.tags.forward(tags)?], D::Minus1)?;
        let mut xs = self.dropout(embedded, train)?;

        let (batch, tokens) = words.dims2()?;
        if lengths.len() != batch || lengths.iter().any(|&len| len >= tokens) {
            candle_core::bail!("lengths {lengths:?} do not fit a ({batch}, {tokens}) batch");
        }
        let reversed = reversal_index(lengths, tokens, words.device())?;

        for (forward, backward) in &self.layers {
            let fwd = forward.states_to_tensor(&forward.seq(&xs)?)?;
            // Each row runs backward from its last word; padding trails behind.
            let flipped = reverse_rows(&xs, &reversed)?;
            let bwd = backward.states_to_tensor(&backward.seq(&flipped)?)?;
            let bwd = reverse_rows(&bwd, &reversed)?;
            xs = self.dropout(Tensor::cat(&[fwd, bwd], D::Minus1)?, train)?;
        }
        Ok(xs)
    }

    fn output_dim(&self) -> usize {
        2 * self.hidden
    }
}

/// Copies pretrained vectors into the word embedding table held by `varmap`.
pub fn apply_pretrained(
    varmap: &VarMap,
    embeddings: &PretrainedEmbeddings,
    vocab: &Vocabulary,
) -> kakari_core::Result<usize> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| KakariError::Embedding("parameter store is poisoned".into()))?;
    let table = data
        .get(WORD_TABLE)
        .ok_or_else(|| KakariError::Embedding(format!("model has no {WORD_TABLE} parameter")))?;
    let (rows, dim) = table.dims2()?;
    if dim != embeddings.dim() {
        return Err(KakariError::Embedding(format!(
            "pretrained vectors have {} dimensions but word_dim is {dim}",
            embeddings.dim()
        )));
    }

    let mut values = table.flatten_all()?.to_vec1::<f32>()?;
    let hits = embeddings.overlay(&mut values, vocab)?;
    table.set(&Tensor::from_vec(values, (rows, dim), table.device())?)?;
    tracing::info!(hits, vocab = rows, "initialised word embeddings from pretrained vectors");
    Ok(hits)
}

const WORD_TABLE: &str = "encoder.words.weight";

/// Encoder plus biaffine arc and label scorers.
pub struct BiaffineParser<E = BiLstmEncoder> {
    encoder: E,
    arc: BiaffineArcScorer,
    label: BiaffineLabelScorer,
    objective: TrainingObjective,
    device: Device,
}

impl BiaffineParser<BiLstmEncoder> {
    /// Builds the default BiLSTM parser with parameters registered in `vb`.
    pub fn new(
        config: &ModelConfig,
        word_vocab: usize,
        tag_vocab: usize,
        num_labels: usize,
        vb: VarBuilder,
    ) -> kakari_core::Result<Self> {
        let encoder = BiLstmEncoder::new(config, word_vocab, tag_vocab, vb.pp("encoder"))?;
        Self::with_encoder(encoder, config, num_labels, vb)
    }
}

impl<E: RepresentationProvider> BiaffineParser<E> {
    pub fn with_encoder(
        encoder: E,
        config: &ModelConfig,
        num_labels: usize,
        vb: VarBuilder,
    ) -> kakari_core::Result<Self> {
        let input_dim = encoder.output_dim();
        let device = vb.device().clone();
        let arc = BiaffineArcScorer::new(input_dim, config.arc_dim, config.dropout, vb.pp("arc"))?;
        let label = BiaffineLabelScorer::new(
            input_dim,
            config.label_dim,
            num_labels,
            config.dropout,
            vb.pp("label"),
        )?;
        Ok(Self {
            encoder,
            arc,
            label,
            objective: config.objective,
            device,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Representations and masked `(batch, N, N)` arc scores.
    pub fn forward(&self, batch: &Batch, train: bool) -> kakari_core::Result<(Tensor, Tensor)> {
        let repr = self
            .encoder
            .represent(&batch.words, &batch.tags, &batch.lengths, train)?;
        let mask = arc_mask(&batch.lengths, batch.padded_len(), &self.device)?;
        let arc_scores = self.arc.forward_masked(&repr, &mask, train)?;
        Ok((repr, arc_scores))
    }

    /// Training loss. Labels are always scored at the gold heads.
    pub fn compute_loss(&self, batch: &Batch, train: bool) -> kakari_core::Result<Loss> {
        if !batch.has_gold() {
            return Err(KakariError::MalformedTree("batch has no gold trees".into()));
        }
        let (repr, arc_scores) = self.forward(batch, train)?;
        let pairs = PairIndex::new(&batch.heads, batch.padded_len(), &self.device)?;
        let label_scores = self.label.forward(&repr, &pairs, train)?;
        let gold = label_targets(&batch.labels, &self.device)?;
        self.objective.compute(&arc_scores, &label_scores, &pairs, &gold)
    }

    /// Decodes one tree per sentence, then labels the decoded arcs.
    pub fn parse(&self, batch: &Batch, decoder: &TreeDecoder) -> kakari_core::Result<Vec<PredictedTree>> {
        let (repr, arc_scores) = self.forward(batch, false)?;

        let mut all_heads = Vec::with_capacity(batch.len());
        for (b, &len) in batch.lengths.iter().enumerate() {
            let scores = ArcScores::from_tensor(&arc_scores.get(b)?, len)?;
            all_heads.push(decoder.decode(&scores, len)?);
        }

        let pairs = PairIndex::new(&all_heads, batch.padded_len(), &self.device)?;
        let mut labels = self.label.predict(&repr, &pairs)?.into_iter();
        let mode = decoder.config().mode;
        Ok(all_heads
            .into_iter()
            .map(|heads| {
                let sentence_labels: Vec<usize> = labels.by_ref().take(heads.len()).collect();
                PredictedTree::new(heads, sentence_labels, mode)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EncodedSentence;
    use candle_core::DType;
    use kakari_core::{DecodeMode, DecoderConfig, Sentence, Token, Vocabularies};

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            word_dim: 4,
            tag_dim: 3,
            lstm_hidden: 5,
            lstm_layers: 2,
            arc_dim: 6,
            label_dim: 3,
            dropout: 0.0,
            min_word_count: 1,
            objective: TrainingObjective::default(),
        }
    }

    fn tiny_batch() -> (Vocabularies, Batch) {
        let sentences = vec![
            Sentence::new(vec![
                Token::new(1, "The").with_arc(2, "det").with_upos("DET"),
                Token::new(2, "dog").with_arc(3, "nsubj").with_upos("NOUN"),
                Token::new(3, "barks").with_arc(0, "root").with_upos("VERB"),
            ]),
            Sentence::new(vec![Token::new(1, "Run").with_arc(0, "root").with_upos("VERB")]),
        ];
        let vocabs = Vocabularies::from_corpus(&sentences, 1, &[]).unwrap();
        let encoded: Vec<EncodedSentence> = sentences
            .iter()
            .map(|s| EncodedSentence::with_gold(&vocabs, s).unwrap())
            .collect();
        let batch = Batch::new(&encoded, &[0, 1], &Device::Cpu).unwrap();
        (vocabs, batch)
    }

    fn parser(varmap: &VarMap, vocabs: &Vocabularies) -> BiaffineParser {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        BiaffineParser::new(
            &tiny_config(),
            vocabs.words.len(),
            vocabs.tags.len(),
            vocabs.labels.len(),
            vb,
        )
        .unwrap()
    }

    #[test]
    fn encoder_output_matches_input_positions() {
        let (vocabs, batch) = tiny_batch();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder =
            BiLstmEncoder::new(&tiny_config(), vocabs.words.len(), vocabs.tags.len(), vb).unwrap();
        let repr = encoder
            .represent(&batch.words, &batch.tags, &batch.lengths, true)
            .unwrap();
        assert_eq!(repr.dims(), &[2, 4, 10]);
        assert_eq!(encoder.output_dim(), 10);
    }

    #[test]
    fn reversal_stays_within_each_row() {
        let index = reversal_index(&[1, 3], 4, &Device::Cpu).unwrap();
        assert_eq!(index.to_vec1::<u32>().unwrap(), vec![1, 0, 2, 3, 7, 6, 5, 4]);
    }

    #[test]
    fn scores_do_not_depend_on_batch_padding() {
        let sentences = vec![
            Sentence::new(vec![
                Token::new(1, "Dogs").with_arc(2, "nsubj").with_upos("NOUN"),
                Token::new(2, "bark").with_arc(0, "root").with_upos("VERB"),
            ]),
            Sentence::new(
                ["The", "old", "dog", "barks", "at", "the", "mail", "carrier"]
                    .iter()
                    .enumerate()
                    .map(|(i, w)| {
                        let head = if i == 3 { 0 } else { 4 };
                        Token::new(i + 1, *w).with_arc(head, "dep").with_upos("X")
                    })
                    .collect(),
            ),
        ];
        let vocabs = Vocabularies::from_corpus(&sentences, 1, &[]).unwrap();
        let encoded: Vec<EncodedSentence> = sentences
            .iter()
            .map(|s| EncodedSentence::with_gold(&vocabs, s).unwrap())
            .collect();

        let varmap = VarMap::new();
        let parser = parser(&varmap, &vocabs);
        for var in varmap.data().lock().unwrap().values() {
            var.set(&Tensor::randn(0f32, 1f32, var.dims(), &Device::Cpu).unwrap())
                .unwrap();
        }

        let alone = Batch::new(&encoded, &[0], &Device::Cpu).unwrap();
        let padded = Batch::new(&encoded, &[0, 1], &Device::Cpu).unwrap();
        let (_, alone) = parser.forward(&alone, false).unwrap();
        let (_, padded) = parser.forward(&padded, false).unwrap();
        let alone = ArcScores::from_tensor(&alone.get(0).unwrap(), 2).unwrap();
        let padded = ArcScores::from_tensor(&padded.get(0).unwrap(), 2).unwrap();
        for dep in 1..=2 {
            for head in 0..=2 {
                let (a, b) = (alone.get(dep, head), padded.get(dep, head));
                assert!((a - b).abs() < 1e-4, "arc {head}->{dep}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn loss_is_finite_and_positive() {
        let (vocabs, batch) = tiny_batch();
        let varmap = VarMap::new();
        let parser = parser(&varmap, &vocabs);
        let loss = parser.compute_loss(&batch, true).unwrap();
        assert!(loss.arc.is_finite() && loss.arc > 0.0);
        assert!(loss.label.is_finite() && loss.label > 0.0);
    }

    #[test]
    fn parse_yields_one_tree_per_sentence() {
        let (vocabs, batch) = tiny_batch();
        let varmap = VarMap::new();
        let parser = parser(&varmap, &vocabs);
        let decoder = TreeDecoder::new(DecoderConfig::default());
        let trees = parser.parse(&batch, &decoder).unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[0].len(), 3);
        assert_eq!(trees[1].heads(), &[0]);
        assert!(trees.iter().all(|t| t.is_well_formed()));
        assert!(trees.iter().all(|t| t.mode() == DecodeMode::WellFormed));
        assert!(trees[0].labels().iter().all(|&l| l < vocabs.labels.len()));
    }

    #[test]
    fn pretrained_vectors_overwrite_rows() {
        let (vocabs, _) = tiny_batch();
        let varmap = VarMap::new();
        let _parser = parser(&varmap, &vocabs);
        let embeddings = PretrainedEmbeddings::parse("dog 1 2 3 4\n".as_bytes()).unwrap();
        assert_eq!(apply_pretrained(&varmap, &embeddings, &vocabs.words).unwrap(), 1);

        let data = varmap.data().lock().unwrap();
        let table = data.get(WORD_TABLE).unwrap().as_tensor().to_vec2::<f32>().unwrap();
        assert_eq!(table[vocabs.words.id("dog").unwrap()], vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn pretrained_dimension_mismatch_fails() {
        let (vocabs, _) = tiny_batch();
        let varmap = VarMap::new();
        let _parser = parser(&varmap, &vocabs);
        let embeddings = PretrainedEmbeddings::parse("dog 1 2\n".as_bytes()).unwrap();
        assert!(apply_pretrained(&varmap, &embeddings, &vocabs.words).is_err());
    }
}
