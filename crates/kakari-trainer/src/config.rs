//! Model and training hyperparameters.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use kakari_core::TrainingObjective;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Architecture hyperparameters. Persisted with every checkpoint so a model
/// can be rebuilt without the command line that trained it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub word_dim: usize,
    pub tag_dim: usize,
    pub lstm_hidden: usize,
    pub lstm_layers: usize,
    pub arc_dim: usize,
    pub label_dim: usize,
    pub dropout: f32,
    /// Training words seen fewer times than this map to `<UNK>`.
    pub min_word_count: usize,
    pub objective: TrainingObjective,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            word_dim: 100,
            tag_dim: 100,
            lstm_hidden: 400,
            lstm_layers: 3,
            arc_dim: 500,
            label_dim: 100,
            dropout: 0.33,
            min_word_count: 2,
            objective: TrainingObjective::default(),
        }
    }
}

impl ModelConfig {
    /// Applies `key=value` overrides. Values are parsed as JSON when
    /// possible and as plain strings otherwise; unknown keys are rejected.
    pub fn with_overrides(self, overrides: &[String]) -> anyhow::Result<Self> {
        let mut value = serde_json::to_value(&self)?;
        let Value::Object(fields) = &mut value else {
            bail!("model config did not serialize to an object");
        };

        for pair in overrides {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("model override {pair:?} is not key=value"))?;
            let key = key.trim();
            let parsed = serde_json::from_str(raw.trim())
                .unwrap_or_else(|_| Value::String(raw.trim().to_string()));

            match key.split_once('.') {
                None if fields.contains_key(key) => {
                    fields.insert(key.to_string(), parsed);
                }
                Some((outer, inner)) => match fields.get_mut(outer) {
                    Some(Value::Object(nested)) if nested.contains_key(inner) => {
                        nested.insert(inner.to_string(), parsed);
                    }
                    _ => bail!("unknown model parameter {key:?}"),
                },
                None => bail!("unknown model parameter {key:?}"),
            }
        }

        serde_json::from_value(value).context("invalid model override")
    }
}

/// Settings of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub train_file: PathBuf,
    pub dev_file: Option<PathBuf>,
    pub embed_file: Option<PathBuf>,
    /// Upper bound on tokens (root included) per mini-batch.
    pub batch_tokens: usize,
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// The learning rate is multiplied by `decay^(step / decay_steps)`.
    pub decay: f64,
    pub decay_steps: usize,
    pub max_grad_norm: f64,
    pub epochs: usize,
    pub seed: u64,
    pub cache_dir: Option<PathBuf>,
    pub out: Option<PathBuf>,
    /// Leave punctuation tokens out of dev scores.
    pub ignore_punct: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_file: PathBuf::new(),
            dev_file: None,
            embed_file: None,
            batch_tokens: 5000,
            lr: 2e-3,
            beta1: 0.9,
            beta2: 0.9,
            eps: 1e-8,
            decay: 0.75,
            decay_steps: 5000,
            max_grad_norm: 5.0,
            epochs: 20,
            seed: 1,
            cache_dir: None,
            out: None,
            ignore_punct: true,
        }
    }
}

impl TrainConfig {
    /// Learning rate after `step` optimizer updates.
    pub fn learning_rate(&self, step: usize) -> f64 {
        self.lr * self.decay.powf(step as f64 / self.decay_steps as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_fields() {
        let config = ModelConfig::default()
            .with_overrides(&[
                "lstm_layers=1".into(),
                "dropout = 0.5".into(),
                "objective.label_weight=0.25".into(),
            ])
            .unwrap();
        assert_eq!(config.lstm_layers, 1);
        assert_eq!(config.dropout, 0.5);
        assert_eq!(config.objective.label_weight, 0.25);
        assert_eq!(config.arc_dim, 500);
    }

    #[test]
    fn unknown_or_malformed_overrides_fail() {
        assert!(ModelConfig::default()
            .with_overrides(&["hidden=3".into()])
            .is_err());
        assert!(ModelConfig::default()
            .with_overrides(&["lstm_layers".into()])
            .is_err());
        assert!(ModelConfig::default()
            .with_overrides(&["lstm_layers=many".into()])
            .is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ModelConfig = serde_json::from_str(r#"{"arc_dim": 8}"#).unwrap();
        assert_eq!(config.arc_dim, 8);
        assert_eq!(config.label_dim, 100);
    }

    #[test]
    fn learning_rate_anneals() {
        let config = TrainConfig::default();
        assert_eq!(config.learning_rate(0), 2e-3);
        assert!((config.learning_rate(5000) - 1.5e-3).abs() < 1e-12);
        assert!(config.learning_rate(10_000) < config.learning_rate(5000));
    }
}
