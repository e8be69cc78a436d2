//! Checkpoint directories: `context.json` plus one safetensors file per epoch.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use kakari_core::Vocabularies;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::model::BiaffineParser;

pub const CONTEXT_FILE: &str = "context.json";

/// Everything besides the weights needed to rebuild a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelContext {
    pub model: ModelConfig,
    pub vocabs: Vocabularies,
    /// Token budget used in training; the default for inference batches.
    pub batch_tokens: usize,
}

impl ModelContext {
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join(CONTEXT_FILE);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, self)?;
        tracing::debug!(path = %path.display(), "saved model context");
        Ok(())
    }

    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(CONTEXT_FILE);
        let file = File::open(&path)
            .with_context(|| format!("no model context at {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid model context {}", path.display()))
    }

    /// Registers a freshly initialised parser in `varmap`.
    pub fn build(&self, varmap: &VarMap, device: &Device) -> anyhow::Result<BiaffineParser> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        Ok(BiaffineParser::new(
            &self.model,
            self.vocabs.words.len(),
            self.vocabs.tags.len(),
            self.vocabs.labels.len(),
            vb,
        )?)
    }
}

/// `epoch-NNN.safetensors` inside `dir`.
pub fn epoch_file(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("epoch-{epoch:03}.safetensors"))
}

pub fn save_weights(varmap: &VarMap, path: &Path) -> anyhow::Result<()> {
    varmap
        .save(path)
        .with_context(|| format!("failed to save weights to {}", path.display()))?;
    tracing::info!(path = %path.display(), "saved model weights");
    Ok(())
}

/// Resolves a weights path: a directory means its latest epoch file.
pub fn resolve_weights(path: &Path) -> anyhow::Result<PathBuf> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }
    fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|p| epoch_number(&p).map(|epoch| (epoch, p)))
        .max_by_key(|(epoch, _)| *epoch)
        .map(|(_, p)| p)
        .with_context(|| format!("no epoch-*.safetensors in {}", path.display()))
}

fn epoch_number(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix("epoch-")?
        .strip_suffix(".safetensors")?
        .parse()
        .ok()
}

/// A parser restored from disk together with its context.
pub struct LoadedModel {
    pub context: ModelContext,
    pub varmap: VarMap,
    pub parser: BiaffineParser,
}

/// Rebuilds the model described by the context next to `model_file` and
/// loads its weights.
pub fn restore(model_file: &Path, device: &Device) -> anyhow::Result<LoadedModel> {
    let weights = resolve_weights(model_file)?;
    let dir = weights.parent().unwrap_or_else(|| Path::new("."));
    let context = ModelContext::load(dir)?;

    let mut varmap = VarMap::new();
    let parser = context.build(&varmap, device)?;
    check_tensors(&weights, &varmap)?;
    varmap
        .load(&weights)
        .with_context(|| format!("failed to load weights from {}", weights.display()))?;
    tracing::info!(path = %weights.display(), "restored model");

    Ok(LoadedModel {
        context,
        varmap,
        parser,
    })
}

/// Every parameter must be stored with the shape the context implies.
fn check_tensors(path: &Path, varmap: &VarMap) -> anyhow::Result<()> {
    let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let stored = SafeTensors::deserialize(&bytes)
        .with_context(|| format!("{} is not a safetensors file", path.display()))?;

    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("parameter store is poisoned"))?;
    for (name, var) in data.iter() {
        let view = match stored.tensor(name) {
            Ok(view) => view,
            Err(_) => bail!("{} has no tensor {name:?}", path.display()),
        };
        if view.shape() != var.dims() {
            bail!(
                "tensor {name:?} in {} has shape {:?}, expected {:?}",
                path.display(),
                view.shape(),
                var.dims()
            );
        }
    }

    let extra = stored.names().into_iter().filter(|n| !data.contains_key(*n)).count();
    if extra > 0 {
        tracing::warn!(extra, path = %path.display(), "checkpoint holds unused tensors");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Batch, EncodedSentence};
    use candle_core::Tensor;
    use kakari_core::{Sentence, Token, TrainingObjective};
    use tempfile::TempDir;

    fn context() -> (ModelContext, Vec<EncodedSentence>) {
        let sentences = vec![Sentence::new(vec![
            Token::new(1, "Birds").with_arc(2, "nsubj").with_upos("NOUN"),
            Token::new(2, "sing").with_arc(0, "root").with_upos("VERB"),
            Token::new(3, "loudly").with_arc(2, "advmod").with_upos("ADV"),
        ])];
        let vocabs = Vocabularies::from_corpus(&sentences, 1, &[]).unwrap();
        let encoded = sentences
            .iter()
            .map(|s| EncodedSentence::with_gold(&vocabs, s).unwrap())
            .collect();
        let model = ModelConfig {
            word_dim: 4,
            tag_dim: 2,
            lstm_hidden: 3,
            lstm_layers: 1,
            arc_dim: 5,
            label_dim: 2,
            dropout: 0.0,
            min_word_count: 1,
            objective: TrainingObjective::default(),
        };
        (
            ModelContext {
                model,
                vocabs,
                batch_tokens: 100,
            },
            encoded,
        )
    }

    fn randomize(varmap: &VarMap) {
        let data = varmap.data().lock().unwrap();
        for var in data.values() {
            let random = Tensor::randn(0f32, 1f32, var.dims(), &Device::Cpu).unwrap();
            var.set(&random).unwrap();
        }
    }

    #[test]
    fn restore_reproduces_scores() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        let (context, corpus) = context();
        let batch = Batch::new(&corpus, &[0], &Device::Cpu).unwrap();

        let varmap = VarMap::new();
        let parser = context.build(&varmap, &Device::Cpu).unwrap();
        randomize(&varmap);
        let (_, before) = parser.forward(&batch, false).unwrap();

        context.save(dir).unwrap();
        save_weights(&varmap, &epoch_file(dir, 1)).unwrap();

        let loaded = restore(dir, &Device::Cpu).unwrap();
        assert_eq!(loaded.context, context);
        let (_, after) = loaded.parser.forward(&batch, false).unwrap();
        assert_eq!(
            before.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            after.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn latest_epoch_is_picked() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        for epoch in [2, 999, 10, 1000, 1] {
            fs::write(epoch_file(dir, epoch), b"").unwrap();
        }
        fs::write(dir.join(CONTEXT_FILE), b"{}").unwrap();
        fs::write(dir.join("epoch-notes.safetensors"), b"").unwrap();
        assert_eq!(resolve_weights(dir).unwrap(), epoch_file(dir, 1000));
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        let (context, _) = context();
        let varmap = VarMap::new();
        context.build(&varmap, &Device::Cpu).unwrap();
        context.save(dir).unwrap();
        save_weights(&varmap, &epoch_file(dir, 1)).unwrap();

        let mut bigger = context.clone();
        bigger.model.arc_dim = 7;
        bigger.save(dir).unwrap();
        let err = restore(&epoch_file(dir, 1), &Device::Cpu).err().unwrap();
        assert!(err.to_string().contains("shape"), "{err}");
    }
}
