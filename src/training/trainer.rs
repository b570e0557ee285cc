//! Fitting an [`EmotionModel`] on labelled transitions
//!
//! Each sample is a seed representation plus a sequence of turn
//! compositions, with one target emotion per turn. The evolved
//! representations are scored against the targets with cross-entropy.

use super::{
    check_gradients_health, compute_grad_norm, LearningConfig, MetricsTracker, Optimizer,
    TrainingMetrics, TrainingResult,
};
use crate::emotion::{Emotion, EmotionVector};
use crate::evaluation::{multiclass_accuracy, predict_labels_tensor, EvaluationReport, F1Average};
use crate::model::EmotionModel;
use crate::{EmotionCoreError, Result};
use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One labelled emotion transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSample {
    /// Representation before the first turn
    pub seed: EmotionVector,

    /// Sentiment composition of each turn
    pub compositions: Vec<EmotionVector>,

    /// Target emotion after each turn
    pub labels: Vec<Emotion>,
}

impl TransitionSample {
    pub fn new(
        seed: EmotionVector,
        compositions: Vec<EmotionVector>,
        labels: Vec<Emotion>,
    ) -> Result<Self> {
        let sample = Self {
            seed,
            compositions,
            labels,
        };
        sample.validate()?;
        Ok(sample)
    }

    pub fn validate(&self) -> Result<()> {
        if self.compositions.is_empty() {
            return Err(EmotionCoreError::Training("sample has no turns".into()));
        }
        if self.compositions.len() != self.labels.len() {
            return Err(EmotionCoreError::Training(format!(
                "sample has {} turns but {} labels",
                self.compositions.len(),
                self.labels.len()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Loss and scores over a held-out set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub loss: f32,
    pub report: EvaluationReport,
}

/// Owns a model and its optimizer for the length of a run
pub struct EmotionTrainer {
    model: EmotionModel,
    optimizer: Optimizer,
    config: LearningConfig,
    tracker: MetricsTracker,
    step: usize,
}

impl EmotionTrainer {
    pub fn new(model: EmotionModel, config: LearningConfig) -> Result<Self> {
        config.validate()?;
        if !model.attention_kind().is_learned() {
            info!(
                attention = %model.attention_kind(),
                "attention has no parameters, only the output projection will be trained"
            );
        }
        let optimizer = Optimizer::from_config(model.trainable_vars(), &config)?;

        Ok(Self {
            model,
            optimizer,
            config,
            tracker: MetricsTracker::new(),
            step: 0,
        })
    }

    pub fn model(&self) -> &EmotionModel {
        &self.model
    }

    pub fn into_model(self) -> EmotionModel {
        self.model
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Per-step training losses recorded so far
    pub fn tracker(&self) -> &MetricsTracker {
        &self.tracker
    }

    /// Logits `[turns, 7]` and cross-entropy loss for one sample
    fn sample_loss(&self, sample: &TransitionSample) -> Result<(Tensor, Tensor)> {
        sample.validate()?;
        let dtype = self.model.dtype();
        let device = self.model.device();

        let seed = sample.seed.to_tensor(dtype, device)?;
        let compositions = sample
            .compositions
            .iter()
            .map(|c| c.to_tensor(dtype, device))
            .collect::<Result<Vec<_>>>()?;

        let logits = self.model.evolve_stacked(&seed, &compositions)?;

        let targets: Vec<u32> = sample.labels.iter().map(|l| l.index() as u32).collect();
        let targets = Tensor::from_vec(targets, sample.labels.len(), device)
            .map_err(|e| EmotionCoreError::Tensor(format!("target tensor failed: {}", e)))?;

        let loss = candle_nn::loss::cross_entropy(&logits, &targets)
            .map_err(|e| EmotionCoreError::Training(format!("cross entropy failed: {}", e)))?;

        Ok((logits, loss))
    }

    fn scalar(loss: &Tensor) -> Result<f32> {
        Ok(loss.to_dtype(DType::F32)?.to_scalar::<f32>()?)
    }

    /// One pass over `samples`, one optimizer step per sample.
    ///
    /// Steps whose gradients contain NaN/Inf are skipped and counted in
    /// [`TrainingMetrics::skipped_steps`].
    pub fn train_epoch(&mut self, samples: &[TransitionSample], epoch: u64) -> Result<TrainingMetrics> {
        if samples.is_empty() {
            return Err(EmotionCoreError::Training("no training samples".into()));
        }

        let start = Instant::now();
        self.model.train();
        let vars = self.model.trainable_vars();

        let mut total_loss = 0.0f32;
        let mut skipped = 0usize;
        let mut predictions = Vec::new();
        let mut truths = Vec::new();

        for sample in samples {
            let (logits, loss) = self.sample_loss(sample)?;
            let loss_value = Self::scalar(&loss)?;

            predictions.extend(predict_labels_tensor(&logits)?);
            truths.extend_from_slice(&sample.labels);

            let grads = loss
                .backward()
                .map_err(|e| EmotionCoreError::Training(format!("backward failed: {}", e)))?;

            if !loss_value.is_finite() || !check_gradients_health(&grads, &vars) {
                warn!(step = self.step, loss = loss_value, "unhealthy gradients, skipping step");
                skipped += 1;
                self.step += 1;
                continue;
            }

            let grad_norm = compute_grad_norm(&grads, &vars)?;
            self.optimizer.safe_step(&grads, &vars, self.config.grad_clip)?;

            self.tracker.record(&TrainingResult {
                loss: loss_value,
                samples: sample.len(),
                grad_norm,
                step: self.step,
            });
            debug!(step = self.step, loss = loss_value, grad_norm, "training step");

            total_loss += loss_value;
            self.step += 1;
        }

        let applied = samples.len() - skipped;
        let mean_loss = if applied > 0 {
            total_loss / applied as f32
        } else {
            f32::NAN
        };
        let accuracy = multiclass_accuracy(&predictions, &truths)?;

        let metrics = TrainingMetrics::new(self.config.run_name.clone(), epoch, mean_loss)
            .with_accuracy(accuracy)
            .with_samples(truths.len())
            .with_skipped(skipped)
            .with_duration_ms(start.elapsed().as_millis() as u64);

        info!(
            run = %metrics.run,
            epoch,
            loss = mean_loss,
            accuracy,
            skipped,
            "📉 Epoch complete"
        );
        Ok(metrics)
    }

    /// Score `samples` without updating parameters.
    ///
    /// Runs in eval mode; the model is left in eval mode afterwards.
    pub fn validate(&mut self, samples: &[TransitionSample]) -> Result<ValidationOutcome> {
        if samples.is_empty() {
            return Err(EmotionCoreError::Training("no validation samples".into()));
        }
        self.model.eval();

        let mut total_loss = 0.0f32;
        let mut predictions = Vec::new();
        let mut truths = Vec::new();

        for sample in samples {
            let (logits, loss) = self.sample_loss(sample)?;
            total_loss += Self::scalar(&loss)?;
            predictions.extend(predict_labels_tensor(&logits)?);
            truths.extend_from_slice(&sample.labels);
        }

        let report = EvaluationReport::compute(&predictions, &truths, F1Average::Weighted)?;
        let loss = total_loss / samples.len() as f32;
        info!(
            loss,
            f1 = report.f1_score,
            accuracy = report.accuracy,
            "🔎 Validation"
        );
        Ok(ValidationOutcome { loss, report })
    }

    /// Train for `config.epochs` epochs.
    ///
    /// With a non-empty `validation` set each epoch is followed by
    /// [`validate`](Self::validate), and `config.patience` stops the run
    /// once validation loss has not improved for that many epochs.
    pub fn fit(
        &mut self,
        train: &[TransitionSample],
        validation: &[TransitionSample],
    ) -> Result<Vec<TrainingMetrics>> {
        let mut history = Vec::with_capacity(self.config.epochs);
        let mut validation_tracker = MetricsTracker::new();

        for epoch in 0..self.config.epochs as u64 {
            history.push(self.train_epoch(train, epoch)?);

            if validation.is_empty() {
                continue;
            }
            let outcome = self.validate(validation)?;
            validation_tracker.record_loss(outcome.loss);

            if let Some(patience) = self.config.patience {
                if validation_tracker.has_converged(patience) {
                    info!(epoch, patience, "Validation loss plateaued, stopping early");
                    break;
                }
            }
        }

        self.model.eval();
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attention::AttentionKind;
    use crate::config::EmotionModelConfig;
    use crate::training::OptimizerKind;

    fn sample(target: Emotion, turns: usize) -> TransitionSample {
        let seed = EmotionVector::one_hot(Emotion::Neutral);
        let mut composition = [0.05f32; 7];
        composition[target.index()] = 0.7;
        TransitionSample::new(
            seed,
            vec![EmotionVector::new(composition); turns],
            vec![target; turns],
        )
        .unwrap()
    }

    fn model(kind: AttentionKind) -> EmotionModel {
        let config = EmotionModelConfig {
            dropout: 0.0,
            ..EmotionModelConfig::default().with_attention(kind)
        };
        EmotionModel::new(config).unwrap()
    }

    #[test]
    fn test_sample_validation() {
        let seed = EmotionVector::one_hot(Emotion::Neutral);
        assert!(TransitionSample::new(seed, vec![], vec![]).is_err());
        assert!(TransitionSample::new(
            seed,
            vec![EmotionVector::one_hot(Emotion::Fear)],
            vec![Emotion::Fear, Emotion::Anger],
        )
        .is_err());
        assert_eq!(sample(Emotion::Fear, 3).len(), 3);
    }

    #[test]
    fn test_train_epoch_reports_metrics() {
        let mut trainer =
            EmotionTrainer::new(model(AttentionKind::DualLinear), LearningConfig::default()).unwrap();
        let data = vec![sample(Emotion::Happiness, 2), sample(Emotion::Sadness, 3)];

        let metrics = trainer.train_epoch(&data, 0).unwrap();
        assert_eq!(metrics.epoch, 0);
        assert_eq!(metrics.samples_trained, 5);
        assert_eq!(metrics.skipped_steps, 0);
        assert!(metrics.loss.is_finite());
        assert!(metrics.accuracy.is_some());
        assert_eq!(trainer.tracker().total_steps(), 2);
    }

    #[test]
    fn test_training_updates_parameters() {
        let mut trainer =
            EmotionTrainer::new(model(AttentionKind::Additive), LearningConfig::default()).unwrap();
        let projection = |t: &EmotionTrainer| {
            t.model()
                .named_vars()
                .into_iter()
                .find(|(name, _)| name == "projection.weight")
                .map(|(_, v)| v.as_tensor().to_vec2::<f32>().unwrap())
                .unwrap()
        };
        let before = projection(&trainer);

        trainer.train_epoch(&[sample(Emotion::Anger, 2)], 0).unwrap();

        let after = projection(&trainer);
        assert_ne!(before, after);
    }

    #[test]
    fn test_fit_reduces_loss() {
        let config = LearningConfig {
            learning_rate: 0.05,
            epochs: 30,
            ..Default::default()
        };
        let mut trainer = EmotionTrainer::new(model(AttentionKind::DotProduct), config).unwrap();
        let data = vec![sample(Emotion::Surprise, 2)];

        let history = trainer.fit(&data, &[]).unwrap();
        assert_eq!(history.len(), 30);
        assert!(history.last().unwrap().loss < history[0].loss);
    }

    #[test]
    fn test_fit_stops_early_on_plateau() {
        let config = LearningConfig {
            optimizer: OptimizerKind::Sgd,
            // far too small to move validation loss
            learning_rate: 1e-12,
            epochs: 20,
            patience: Some(2),
            ..Default::default()
        };
        let mut trainer = EmotionTrainer::new(model(AttentionKind::DualLinear), config).unwrap();
        let data = vec![sample(Emotion::Disgust, 2)];

        let history = trainer.fit(&data, &data).unwrap();
        assert!(history.len() < 20);
    }

    #[test]
    fn test_validate_leaves_eval_mode() {
        let mut trainer =
            EmotionTrainer::new(model(AttentionKind::DualLinear), LearningConfig::default()).unwrap();
        let data = vec![sample(Emotion::Fear, 2)];
        trainer.train_epoch(&data, 0).unwrap();

        let outcome = trainer.validate(&data).unwrap();
        assert!(!trainer.model().mode().is_train());
        assert!(outcome.loss.is_finite());
        assert!((0.0..=1.0).contains(&outcome.report.accuracy));
    }

    #[test]
    fn test_empty_sets_are_errors() {
        let mut trainer =
            EmotionTrainer::new(model(AttentionKind::DotProduct), LearningConfig::default()).unwrap();
        assert!(trainer.train_epoch(&[], 0).is_err());
        assert!(trainer.validate(&[]).is_err());
    }
}
