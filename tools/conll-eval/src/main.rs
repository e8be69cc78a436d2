//! Scores a system CoNLL file against gold and prints UAS/LAS as JSON.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use kakari_core::{read_conll, Evaluator, PunctPolicy, DEFAULT_PUNCT_TAGS};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "conll-eval")]
#[command(about = "Attachment scores of a parsed CoNLL file against gold")]
#[command(version)]
struct Cli {
    /// Gold-annotated corpus
    gold: PathBuf,

    /// System output, sentence-aligned with the gold corpus
    system: PathBuf,

    /// Do not score punctuation tokens
    #[arg(long)]
    ignore_punct: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    uas: f64,
    las: f64,
    tokens: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    let gold = read_conll(&cli.gold).with_context(|| format!("cannot read {}", cli.gold.display()))?;
    let system =
        read_conll(&cli.system).with_context(|| format!("cannot read {}", cli.system.display()))?;
    if gold.len() != system.len() {
        bail!(
            "{} has {} sentences but {} has {}",
            cli.gold.display(),
            gold.len(),
            cli.system.display(),
            system.len()
        );
    }

    let mut evaluator = if cli.ignore_punct {
        Evaluator::ignoring_punct(PunctPolicy::new(DEFAULT_PUNCT_TAGS)?)
    } else {
        Evaluator::new()
    };
    for (i, (g, s)) in gold.iter().zip(&system).enumerate() {
        evaluator
            .evaluate_sentences(g, s)
            .with_context(|| format!("sentence {}", i + 1))?;
    }

    let scores = evaluator.scores();
    tracing::debug!(%scores, "scored corpus");
    let report = Report {
        uas: scores.uas(),
        las: scores.las(),
        tokens: scores.total,
    };
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
