//! `kakari` command line: train a biaffine parser or test a trained one.

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use candle_core::Device;
use clap::{ArgAction, Parser, Subcommand};
use kakari_core::{annotate, write_conll, DecoderConfig, TreeDecoder};
use kakari_trainer::trainer::{evaluate, load_targets, parse_corpus};
use kakari_trainer::{restore, ModelConfig, TrainConfig, Trainer};
use tracing::info;

#[derive(Parser)]
#[command(name = "kakari")]
#[command(about = "Graph-based dependency parser with biaffine scoring")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on a CoNLL corpus
    Train {
        /// Training corpus
        #[arg(long)]
        train_file: PathBuf,

        /// Development corpus, scored after every epoch
        #[arg(long)]
        dev_file: Option<PathBuf>,

        /// Pretrained word vectors (word2vec text format)
        #[arg(long)]
        embed_file: Option<PathBuf>,

        /// Maximum tokens per mini-batch
        #[arg(short, long, default_value_t = 5000)]
        batch_tokens: usize,

        /// Initial learning rate
        #[arg(long, default_value_t = 2e-3)]
        lr: f64,

        /// Passes over the training corpus
        #[arg(short, long, default_value_t = 20)]
        epochs: usize,

        /// `cpu` or `cuda:N`
        #[arg(short, long, default_value = "cpu")]
        device: String,

        /// Directory for parsed-corpus caches
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Checkpoint directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Model hyperparameter override, e.g. `--model lstm_layers=2`
        #[arg(long = "model", value_name = "KEY=VALUE")]
        model: Vec<String>,

        /// Seed for shuffling and initialisation
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Leave punctuation out of dev scores (`--ignore-punct false` to keep it)
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        ignore_punct: bool,
    },
    /// Parse and score a CoNLL corpus with a trained model
    Test {
        /// Epoch weights file or checkpoint directory
        #[arg(long)]
        model_file: PathBuf,

        /// Corpus to parse
        #[arg(long)]
        target_file: PathBuf,

        /// Print the parsed corpus as CoNLL to stdout
        #[arg(long)]
        decode: bool,

        /// `cpu` or `cuda:N`
        #[arg(short, long, default_value = "cpu")]
        device: String,

        /// Maximum tokens per mini-batch (defaults to the training budget)
        #[arg(short, long)]
        batch_tokens: Option<usize>,

        /// Attach exactly one token to the root
        #[arg(long)]
        single_root: bool,

        /// Leave punctuation out of the scores (`--ignore-punct false` to keep it)
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        ignore_punct: bool,
    },
}

fn parse_device(spec: &str) -> Result<Device> {
    match spec {
        "cpu" => Ok(Device::Cpu),
        _ => match spec.strip_prefix("cuda:").map(str::parse::<usize>) {
            Some(Ok(ordinal)) => Device::new_cuda(ordinal).context("CUDA device unavailable"),
            _ => bail!("unknown device {spec:?}, expected `cpu` or `cuda:N`"),
        },
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train {
            train_file,
            dev_file,
            embed_file,
            batch_tokens,
            lr,
            epochs,
            device,
            cache_dir,
            out,
            model,
            seed,
            ignore_punct,
        } => {
            let model = ModelConfig::default().with_overrides(&model)?;
            let config = TrainConfig {
                train_file,
                dev_file,
                embed_file,
                batch_tokens,
                lr,
                epochs,
                seed,
                cache_dir,
                out,
                ignore_punct,
                ..TrainConfig::default()
            };
            info!(?model, "model configuration");
            let reports = Trainer::new(config, model, parse_device(&device)?).run()?;
            if let Some(best) = reports
                .iter()
                .filter_map(|r| r.dev.map(|d| (r.epoch, d)))
                .max_by(|a, b| a.1.las().total_cmp(&b.1.las()))
            {
                info!(epoch = best.0, "best dev score {}", best.1);
            }
        }
        Commands::Test {
            model_file,
            target_file,
            decode,
            device,
            batch_tokens,
            single_root,
            ignore_punct,
        } => {
            let device = parse_device(&device)?;
            let loaded = restore(&model_file, &device)?;
            let sentences = load_targets(&target_file)?;
            info!(path = %target_file.display(), sentences = sentences.len(), "loaded target corpus");

            let decoder = TreeDecoder::new(DecoderConfig::new().with_single_root(single_root));
            let budget = batch_tokens.unwrap_or(loaded.context.batch_tokens);
            let trees = parse_corpus(&loaded.parser, &sentences, &loaded.context.vocabs, &decoder, budget)?;

            if decode {
                let annotated: Vec<_> = sentences
                    .iter()
                    .zip(&trees)
                    .map(|(s, t)| annotate(s, t, &loaded.context.vocabs.labels))
                    .collect();
                let mut stdout = BufWriter::new(io::stdout().lock());
                write_conll(&mut stdout, &annotated)?;
                stdout.flush()?;
            }

            if sentences.iter().all(|s| s.gold_heads().is_some()) {
                let scores = evaluate(&sentences, &trees, &loaded.context.vocabs, ignore_punct)?;
                info!(uas = scores.uas(), las = scores.las(), tokens = scores.total, "evaluation");
                eprintln!("[evaluation] {scores}");
            } else {
                info!("target corpus is not fully annotated; skipping evaluation");
            }
        }
    }
    Ok(())
}
