//! Training loop and corpus-level inference.

use std::path::Path;

use anyhow::Context;
use candle_core::backprop::GradStore;
use candle_core::{Device, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use kakari_core::{
    AttachmentScores, DecodeMode, DecoderConfig, Evaluator, KakariError, PredictedTree,
    PunctPolicy, Sentence, TreeDecoder, Vocabularies, DEFAULT_PUNCT_TAGS,
};

use crate::checkpoint::{epoch_file, save_weights, ModelContext};
use crate::config::{ModelConfig, TrainConfig};
use crate::data::{load_corpus, Batch, Batcher, EncodedSentence, PretrainedEmbeddings};
use crate::model::{apply_pretrained, BiaffineParser};

/// Summary of one pass over the training data.
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    /// Mean unweighted arc plus label loss over the applied batches.
    pub loss: f32,
    /// Greedy head accuracy on the training batches, in percent.
    pub train_uas: f64,
    /// Batches dropped for non-finite loss.
    pub skipped: usize,
    pub dev: Option<AttachmentScores>,
}

pub struct Trainer {
    config: TrainConfig,
    model: ModelConfig,
    device: Device,
}

impl Trainer {
    pub fn new(config: TrainConfig, model: ModelConfig, device: Device) -> Self {
        Self {
            config,
            model,
            device,
        }
    }

    /// Trains for `config.epochs` epochs, evaluating on the dev corpus and
    /// writing a checkpoint after every epoch when an output directory is set.
    pub fn run(&self) -> anyhow::Result<Vec<EpochReport>> {
        let config = &self.config;
        let cache = config.cache_dir.as_deref();

        let train = load_corpus(&config.train_file, cache)?;
        let dev = match &config.dev_file {
            Some(path) => Some(load_corpus(path, cache)?),
            None => None,
        };
        let embeddings = match &config.embed_file {
            Some(path) => Some(PretrainedEmbeddings::load(path)?),
            None => None,
        };

        let extra_words = embeddings.as_ref().map(|e| e.words()).unwrap_or(&[]);
        let vocabs = Vocabularies::from_corpus(&train, self.model.min_word_count, extra_words)?;
        let encoded = train
            .iter()
            .map(|s| EncodedSentence::with_gold(&vocabs, s))
            .collect::<kakari_core::Result<Vec<_>>>()
            .context("failed to encode training corpus")?;

        let context = ModelContext {
            model: self.model.clone(),
            vocabs,
            batch_tokens: config.batch_tokens,
        };
        if let Some(out) = &config.out {
            context.save(out)?;
        }

        if let Err(e) = self.device.set_seed(config.seed) {
            tracing::warn!(error = %e, "device does not support seeding; initialisation is not reproducible");
        }
        let varmap = VarMap::new();
        let parser = context.build(&varmap, &self.device)?;
        if let Some(embeddings) = &embeddings {
            apply_pretrained(&varmap, embeddings, &context.vocabs.words)?;
        }

        let vars = varmap.all_vars();
        let mut optimizer = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: config.lr,
                beta1: config.beta1,
                beta2: config.beta2,
                eps: config.eps,
                weight_decay: 0.0,
            },
        )?;
        tracing::info!(
            lr = config.lr,
            beta1 = config.beta1,
            beta2 = config.beta2,
            eps = config.eps,
            max_grad_norm = config.max_grad_norm,
            parameters = vars.iter().map(|v| v.elem_count()).sum::<usize>(),
            "initialised optimizer"
        );

        let sizes: Vec<usize> = encoded.iter().map(|s| s.words.len()).collect();
        let batcher = Batcher::new(config.batch_tokens);
        let greedy = TreeDecoder::new(DecoderConfig::new().with_mode(DecodeMode::Greedy));
        let mut rng = oorandom::Rand32::new(config.seed);
        let mut step = 0usize;
        let mut reports = Vec::with_capacity(config.epochs);

        for epoch in 1..=config.epochs {
            let mut loss_sum = 0f32;
            let mut applied = 0usize;
            let mut skipped = 0usize;
            let mut correct = 0usize;
            let mut total = 0usize;

            for indices in batcher.batches(&sizes, Some(&mut rng)) {
                let batch = Batch::new(&encoded, &indices, &self.device)?;
                let loss = match parser.compute_loss(&batch, true) {
                    Ok(loss) => loss,
                    Err(KakariError::NumericInstability { context }) => {
                        tracing::warn!(epoch, step, %context, "skipping batch with non-finite loss");
                        skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                let mut grads = loss.total.backward()?;
                let norm = match clip_gradients(&mut grads, &vars, config.max_grad_norm) {
                    Ok(norm) => norm,
                    Err(KakariError::NumericInstability { context }) => {
                        tracing::warn!(epoch, step, %context, "skipping batch with non-finite gradients");
                        skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                optimizer.set_learning_rate(config.learning_rate(step));
                optimizer.step(&grads)?;
                step += 1;

                for (tree, gold) in parser.parse(&batch, &greedy)?.iter().zip(&batch.heads) {
                    correct += tree.heads().iter().zip(gold).filter(|(p, g)| p == g).count();
                    total += gold.len();
                }
                loss_sum += loss.arc + loss.label;
                applied += 1;
                tracing::debug!(
                    epoch,
                    step,
                    tokens = batch.num_tokens(),
                    arc_loss = loss.arc,
                    label_loss = loss.label,
                    grad_norm = norm,
                    lr = config.learning_rate(step),
                    "step"
                );
            }

            let dev_scores = match &dev {
                Some(dev) => {
                    let trees = parse_corpus(
                        &parser,
                        dev,
                        &context.vocabs,
                        &TreeDecoder::default(),
                        config.batch_tokens,
                    )?;
                    Some(evaluate(dev, &trees, &context.vocabs, config.ignore_punct)?)
                }
                None => None,
            };

            let report = EpochReport {
                epoch,
                loss: if applied > 0 { loss_sum / applied as f32 } else { f32::NAN },
                train_uas: if total > 0 { correct as f64 / total as f64 * 100.0 } else { 0.0 },
                skipped,
                dev: dev_scores,
            };
            match &report.dev {
                Some(dev) => tracing::info!(
                    epoch,
                    epochs = config.epochs,
                    loss = report.loss,
                    train_uas = report.train_uas,
                    dev_uas = dev.uas(),
                    dev_las = dev.las(),
                    "epoch complete"
                ),
                None => tracing::info!(
                    epoch,
                    epochs = config.epochs,
                    loss = report.loss,
                    train_uas = report.train_uas,
                    "epoch complete"
                ),
            }

            if let Some(out) = &config.out {
                save_weights(&varmap, &epoch_file(out, epoch))?;
            }
            reports.push(report);
        }

        Ok(reports)
    }
}

/// Rescales all gradients so their joint L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_gradients(
    grads: &mut GradStore,
    vars: &[Var],
    max_norm: f64,
) -> kakari_core::Result<f32> {
    let mut squared = 0f32;
    for var in vars {
        if let Some(grad) = grads.get(var) {
            squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    let norm = squared.sqrt();
    if !norm.is_finite() {
        return Err(KakariError::NumericInstability {
            context: format!("gradient norm = {norm}"),
        });
    }

    if f64::from(norm) > max_norm {
        let scale = max_norm / (f64::from(norm) + 1e-6);
        for var in vars {
            if let Some(grad) = grads.get(var) {
                let clipped = grad.affine(scale, 0.0)?;
                grads.insert(var, clipped);
            }
        }
    }
    Ok(norm)
}

/// Parses a corpus in its original order.
pub fn parse_corpus(
    parser: &BiaffineParser,
    sentences: &[Sentence],
    vocabs: &Vocabularies,
    decoder: &TreeDecoder,
    batch_tokens: usize,
) -> anyhow::Result<Vec<PredictedTree>> {
    let encoded: Vec<EncodedSentence> = sentences
        .iter()
        .map(|s| EncodedSentence::without_gold(vocabs, s))
        .collect();
    let sizes: Vec<usize> = encoded.iter().map(|s| s.words.len()).collect();

    let mut trees = Vec::with_capacity(sentences.len());
    for indices in Batcher::new(batch_tokens).batches(&sizes, None) {
        let batch = Batch::new(&encoded, &indices, parser.device())?;
        trees.extend(parser.parse(&batch, decoder)?);
    }
    Ok(trees)
}

/// Attachment scores of `trees` against the gold sentences.
pub fn evaluate(
    gold: &[Sentence],
    trees: &[PredictedTree],
    vocabs: &Vocabularies,
    ignore_punct: bool,
) -> anyhow::Result<AttachmentScores> {
    let mut evaluator = if ignore_punct {
        Evaluator::ignoring_punct(PunctPolicy::new(DEFAULT_PUNCT_TAGS)?)
    } else {
        Evaluator::new()
    };
    for (i, (sentence, tree)) in gold.iter().zip(trees).enumerate() {
        evaluator
            .evaluate(sentence, tree, &vocabs.labels)
            .with_context(|| format!("cannot score sentence {}", i + 1))?;
    }
    Ok(evaluator.scores())
}

/// Loads a corpus without checking gold trees; used for prediction targets.
pub fn load_targets(path: &Path) -> anyhow::Result<Vec<Sentence>> {
    kakari_core::read_conll(path).with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Tensor};
    use kakari_core::TrainingObjective;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const CORPUS: &str = "\
# sent_id = 1
1\tThe\t_\tDET\t_\t_\t2\tdet\t_\t_
2\tdog\t_\tNOUN\t_\t_\t3\tnsubj\t_\t_
3\tbarks\t_\tVERB\t_\t_\t0\troot\t_\t_
4\t.\t_\tPUNCT\t_\t_\t3\tpunct\t_\t_

1\tA\t_\tDET\t_\t_\t2\tdet\t_\t_
2\tcat\t_\tNOUN\t_\t_\t3\tnsubj\t_\t_
3\tsleeps\t_\tVERB\t_\t_\t0\troot\t_\t_

1\tBirds\t_\tNOUN\t_\t_\t2\tnsubj\t_\t_
2\tsing\t_\tVERB\t_\t_\t0\troot\t_\t_

";

    fn tiny_model() -> ModelConfig {
        ModelConfig {
            word_dim: 8,
            tag_dim: 4,
            lstm_hidden: 8,
            lstm_layers: 1,
            arc_dim: 8,
            label_dim: 4,
            dropout: 0.1,
            min_word_count: 1,
            objective: TrainingObjective::default(),
        }
    }

    #[test]
    fn short_run_writes_checkpoints_and_scores_dev() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        let corpus = dir.join("train.conllu");
        fs::write(&corpus, CORPUS).unwrap();
        let out = dir.join("model");

        let config = TrainConfig {
            train_file: corpus.clone(),
            dev_file: Some(corpus),
            batch_tokens: 8,
            epochs: 2,
            out: Some(out.clone()),
            cache_dir: Some(dir.join("cache")),
            ..TrainConfig::default()
        };
        let reports = Trainer::new(config, tiny_model(), Device::Cpu).run().unwrap();

        assert_eq!(reports.len(), 2);
        for report in &reports {
            assert!(report.loss.is_finite() && report.loss > 0.0);
            assert_eq!(report.skipped, 0);
            let dev = report.dev.unwrap();
            // The final "." is punctuation and not scored.
            assert_eq!(dev.total, 8);
        }
        assert!(out.join("context.json").exists());
        assert!(epoch_file(&out, 1).exists());
        assert!(epoch_file(&out, 2).exists());

        let loaded = crate::checkpoint::restore(&out, &Device::Cpu).unwrap();
        let gold = load_targets(&dir.join("train.conllu")).unwrap();
        let trees = parse_corpus(
            &loaded.parser,
            &gold,
            &loaded.context.vocabs,
            &TreeDecoder::default(),
            loaded.context.batch_tokens,
        )
        .unwrap();
        assert_eq!(trees.len(), 3);
        assert!(trees.iter().all(|t| t.is_well_formed()));
        let scores = evaluate(&gold, &trees, &loaded.context.vocabs, false).unwrap();
        assert_eq!(scores.total, 9);
    }

    #[test]
    fn dev_scores_follow_punctuation_setting() {
        let tmp = TempDir::new().unwrap();
        let corpus = tmp.path().join("train.conllu");
        fs::write(&corpus, CORPUS).unwrap();

        let totals: Vec<usize> = [true, false]
            .into_iter()
            .map(|ignore_punct| {
                let config = TrainConfig {
                    train_file: corpus.clone(),
                    dev_file: Some(corpus.clone()),
                    batch_tokens: 8,
                    epochs: 1,
                    ignore_punct,
                    ..TrainConfig::default()
                };
                let reports = Trainer::new(config, tiny_model(), Device::Cpu).run().unwrap();
                reports[0].dev.unwrap().total
            })
            .collect();
        assert_eq!(totals, vec![8, 9]);
    }

    #[test]
    fn unknown_training_file_is_an_error() {
        let config = TrainConfig {
            train_file: PathBuf::from("/nonexistent/train.conllu"),
            ..TrainConfig::default()
        };
        assert!(Trainer::new(config, tiny_model(), Device::Cpu).run().is_err());
    }

    #[test]
    fn gradients_are_clipped_to_max_norm() {
        let a = Var::from_tensor(&Tensor::new(&[1f32, 2.0], &Device::Cpu).unwrap()).unwrap();
        let b = Var::zeros(1, DType::F32, &Device::Cpu).unwrap();
        // d/da sum(3a) = 3, d/db sum(4b) = 4: norm = sqrt(9 + 9 + 16) = sqrt(34)
        let loss = ((a.affine(3.0, 0.0).unwrap().sum_all().unwrap())
            + b.affine(4.0, 0.0).unwrap().sum_all().unwrap())
        .unwrap();
        let mut grads = loss.backward().unwrap();
        let vars = vec![a.clone(), b.clone()];

        let norm = clip_gradients(&mut grads, &vars, 1.0).unwrap();
        assert!((norm - 34f32.sqrt()).abs() < 1e-4);

        let clipped: f32 = vars
            .iter()
            .map(|v| {
                grads
                    .get(v)
                    .unwrap()
                    .sqr()
                    .unwrap()
                    .sum_all()
                    .unwrap()
                    .to_scalar::<f32>()
                    .unwrap()
            })
            .sum();
        assert!((clipped.sqrt() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn small_gradients_are_untouched() {
        let a = Var::from_tensor(&Tensor::new(&[1f32], &Device::Cpu).unwrap()).unwrap();
        let loss = a.affine(0.5, 0.0).unwrap().sum_all().unwrap();
        let mut grads = loss.backward().unwrap();
        let norm = clip_gradients(&mut grads, &[a.clone()], 5.0).unwrap();
        assert!((norm - 0.5).abs() < 1e-6);
        let grad = grads.get(&a).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(grad, vec![0.5]);
    }
}
