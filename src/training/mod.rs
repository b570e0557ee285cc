//! Training Infrastructure
//!
//! Optimizers, gradient safety and loss tracking for the emotion model.
//!
//! ## Overview
//!
//! - **Optimizers**: Wrapped candle-nn optimizers (AdamW, SGD)
//! - **Gradient utilities**: clipping, NaN detection, norm monitoring
//! - **Metrics**: Loss tracking and convergence monitoring
//! - **Trainer**: [`EmotionTrainer`] fits an [`EmotionModel`](crate::model::EmotionModel)
//!   on labelled emotion transitions
//!
//! ## Example
//!
//! ```ignore
//! use an_emotion_model::training::*;
//!
//! let mut trainer = EmotionTrainer::new(model, LearningConfig::default())?;
//! let history = trainer.fit(&train_samples, &validation_samples)?;
//! let model = trainer.into_model();
//! ```

mod trainer;

pub use trainer::{EmotionTrainer, TransitionSample, ValidationOutcome};

use crate::{EmotionCoreError, Result};
use candle_core::backprop::GradStore;
use candle_core::{DType, Var};
use candle_nn::optim::Optimizer as CandleOptimizer;
use serde::{Deserialize, Serialize};

// =============================================================================
// Metrics types
// =============================================================================

/// Training metrics published after epochs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// Run this epoch belongs to
    pub run: String,

    /// Current epoch number
    pub epoch: u64,

    /// Mean loss for this epoch
    pub loss: f32,

    /// Accuracy (if applicable)
    pub accuracy: Option<f32>,

    /// Number of samples trained on
    pub samples_trained: usize,

    /// Steps skipped because of unhealthy gradients
    pub skipped_steps: usize,

    /// Duration of this epoch in milliseconds
    pub duration_ms: u64,
}

impl TrainingMetrics {
    /// Create new training metrics
    pub fn new(run: impl Into<String>, epoch: u64, loss: f32) -> Self {
        Self {
            run: run.into(),
            epoch,
            loss,
            accuracy: None,
            samples_trained: 0,
            skipped_steps: 0,
            duration_ms: 0,
        }
    }

    /// Builder: set accuracy
    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Builder: set samples trained
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples_trained = samples;
        self
    }

    /// Builder: set skipped steps
    pub fn with_skipped(mut self, skipped: usize) -> Self {
        self.skipped_steps = skipped;
        self
    }

    /// Builder: set duration
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }
}

// =============================================================================
// Optimizers
// =============================================================================

/// Wrapper around candle-nn's AdamW optimizer
pub struct AdamOptimizer {
    inner: candle_nn::optim::AdamW,
}

impl AdamOptimizer {
    /// Create a new Adam optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Result<Self> {
        let params = candle_nn::optim::ParamsAdamW {
            lr: learning_rate,
            weight_decay,
            ..Default::default()
        };

        let inner = <candle_nn::optim::AdamW as CandleOptimizer>::new(vars, params)
            .map_err(|e| EmotionCoreError::Tensor(format!("AdamW init failed: {}", e)))?;

        Ok(Self { inner })
    }
}

/// Wrapper around candle-nn's SGD optimizer
pub struct SGDOptimizer {
    inner: candle_nn::optim::SGD,
}

impl SGDOptimizer {
    /// Create a new SGD optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let inner = <candle_nn::optim::SGD as CandleOptimizer>::new(vars, learning_rate)
            .map_err(|e| EmotionCoreError::Tensor(format!("SGD init failed: {}", e)))?;

        Ok(Self { inner })
    }
}

/// Which optimizer a [`LearningConfig`] asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    AdamW,
    Sgd,
}

/// Optimizer enum for flexibility
pub enum Optimizer {
    /// Stochastic Gradient Descent optimizer
    SGD(SGDOptimizer),
    /// Adam optimizer with weight decay (AdamW)
    Adam(AdamOptimizer),
}

impl Optimizer {
    /// Create SGD optimizer
    pub fn sgd(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        Ok(Self::SGD(SGDOptimizer::new(vars, learning_rate)?))
    }

    /// Create Adam optimizer
    pub fn adam(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Result<Self> {
        Ok(Self::Adam(AdamOptimizer::new(vars, learning_rate, weight_decay)?))
    }

    /// Build whichever optimizer `config` names
    pub fn from_config(vars: Vec<Var>, config: &LearningConfig) -> Result<Self> {
        match config.optimizer {
            OptimizerKind::AdamW => Self::adam(vars, config.learning_rate, config.weight_decay),
            OptimizerKind::Sgd => Self::sgd(vars, config.learning_rate),
        }
    }

    /// Take a gradient step
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::SGD(opt) => CandleOptimizer::step(&mut opt.inner, grads),
            Self::Adam(opt) => CandleOptimizer::step(&mut opt.inner, grads),
        }
        .map_err(|e| EmotionCoreError::Training(format!("optimizer step failed: {}", e)))
    }

    /// Step with gradient clipping, see [`safe_optimizer_step`]
    pub fn safe_step(&mut self, grads: &GradStore, vars: &[Var], max_grad_norm: f32) -> Result<()> {
        let lr = self.learning_rate();
        match self {
            Self::SGD(opt) => safe_optimizer_step(&mut opt.inner, grads, vars, max_grad_norm, lr),
            Self::Adam(opt) => safe_optimizer_step(&mut opt.inner, grads, vars, max_grad_norm, lr),
        }
    }

    /// Get the learning rate
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::SGD(opt) => CandleOptimizer::learning_rate(&opt.inner),
            Self::Adam(opt) => CandleOptimizer::learning_rate(&opt.inner),
        }
    }

    /// Set the learning rate
    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::SGD(opt) => CandleOptimizer::set_learning_rate(&mut opt.inner, lr),
            Self::Adam(opt) => CandleOptimizer::set_learning_rate(&mut opt.inner, lr),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for learning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Name used in logs and [`TrainingMetrics`]
    pub run_name: String,

    /// Learning rate
    pub learning_rate: f64,

    /// AdamW or SGD
    pub optimizer: OptimizerKind,

    /// Passes over the training set
    pub epochs: usize,

    /// Gradient clipping threshold
    pub grad_clip: f32,

    /// Weight decay for regularization (AdamW only)
    pub weight_decay: f64,

    /// Stop after this many epochs without validation improvement
    pub patience: Option<usize>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            run_name: "emotion_model".into(),
            learning_rate: 0.001,
            optimizer: OptimizerKind::AdamW,
            epochs: 3,
            grad_clip: 1.0,
            weight_decay: 0.01,
            patience: None,
        }
    }
}

impl LearningConfig {
    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(EmotionCoreError::OutOfRange {
                name: "learning_rate".into(),
                value: self.learning_rate,
                bound: "(0, inf)",
            });
        }
        if !(self.grad_clip.is_finite() && self.grad_clip > 0.0) {
            return Err(EmotionCoreError::OutOfRange {
                name: "grad_clip".into(),
                value: self.grad_clip as f64,
                bound: "(0, inf)",
            });
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(EmotionCoreError::OutOfRange {
                name: "weight_decay".into(),
                value: self.weight_decay,
                bound: "[0, inf)",
            });
        }
        if self.epochs == 0 {
            return Err(EmotionCoreError::Config("epochs must be at least 1".into()));
        }
        Ok(())
    }
}

/// Result of a training step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    /// Loss value
    pub loss: f32,

    /// Number of samples processed
    pub samples: usize,

    /// Gradient norm before clipping
    pub grad_norm: f32,

    /// Training step number
    pub step: usize,
}

/// Training metrics tracker
#[derive(Debug, Default)]
pub struct MetricsTracker {
    /// Loss history
    losses: Vec<f32>,

    /// Best loss seen
    best_loss: Option<f32>,

    /// Records since improvement
    steps_since_improvement: usize,
}

impl MetricsTracker {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a training result
    pub fn record(&mut self, result: &TrainingResult) {
        self.record_loss(result.loss);
    }

    /// Record a bare loss value (e.g. a validation loss)
    pub fn record_loss(&mut self, loss: f32) {
        self.losses.push(loss);

        match self.best_loss {
            Some(best) if loss >= best => self.steps_since_improvement += 1,
            _ => {
                self.best_loss = Some(loss);
                self.steps_since_improvement = 0;
            }
        }
    }

    /// Get average loss over last N records
    pub fn average_loss(&self, n: usize) -> Option<f32> {
        if self.losses.is_empty() || n == 0 {
            return None;
        }

        let start = self.losses.len().saturating_sub(n);
        let slice = &self.losses[start..];
        Some(slice.iter().sum::<f32>() / slice.len() as f32)
    }

    /// Check if training has converged (no improvement for N records)
    pub fn has_converged(&self, patience: usize) -> bool {
        !self.losses.is_empty() && self.steps_since_improvement >= patience
    }

    /// Get best loss
    pub fn best_loss(&self) -> Option<f32> {
        self.best_loss
    }

    /// Get total records
    pub fn total_steps(&self) -> usize {
        self.losses.len()
    }
}

// =============================================================================
// Gradient Utilities
// =============================================================================

fn grad_values(grad: &candle_core::Tensor) -> candle_core::Result<Vec<f32>> {
    grad.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()
}

fn grad_sq_norm(grad: &candle_core::Tensor) -> candle_core::Result<f32> {
    grad.to_dtype(DType::F32)?.sqr()?.sum_all()?.to_scalar::<f32>()
}

/// Safe optimizer step with gradient clipping
///
/// When gradients contain NaN/Inf, the step is skipped and an error is returned.
/// When the gradient norm exceeds `max_grad_norm`, gradients are scaled down and
/// applied as a plain descent step at `learning_rate`.
///
/// # Example
///
/// ```ignore
/// let grads = loss.backward()?;
/// match safe_optimizer_step(&mut optimizer, &grads, &vars, 1.0, 0.001) {
///     Ok(()) => {}
///     Err(e) if e.to_string().contains("NaN") => continue,
///     Err(e) => return Err(e),
/// }
/// ```
pub fn safe_optimizer_step<O: CandleOptimizer>(
    optimizer: &mut O,
    grads: &GradStore,
    vars: &[Var],
    max_grad_norm: f32,
    learning_rate: f64,
) -> Result<()> {
    if !check_gradients_health(grads, vars) {
        return Err(EmotionCoreError::Training(
            "NaN detected in gradients - skipping step".into(),
        ));
    }

    let total_norm = compute_grad_norm(grads, vars)?;

    if total_norm > max_grad_norm && total_norm > 0.0 {
        let scale = max_grad_norm / total_norm;

        for var in vars {
            if let Some(grad) = grads.get(var.as_tensor()) {
                let step = grad
                    .affine(scale as f64 * learning_rate, 0.0)
                    .map_err(|e| EmotionCoreError::Tensor(format!("scale failed: {}", e)))?;

                let updated = (var.as_tensor() - &step)
                    .map_err(|e| EmotionCoreError::Tensor(format!("sub failed: {}", e)))?;

                var.set(&updated)
                    .map_err(|e| EmotionCoreError::Tensor(format!("set failed: {}", e)))?;
            }
        }

        Ok(())
    } else {
        optimizer
            .step(grads)
            .map_err(|e| EmotionCoreError::Training(format!("optimizer step failed: {}", e)))
    }
}

/// Compute the total L2 norm of all gradients
///
/// Useful for monitoring gradient explosion during training.
pub fn compute_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut total_sq_norm = 0.0f32;
    for grad in vars.iter().filter_map(|var| grads.get(var.as_tensor())) {
        total_sq_norm += grad_sq_norm(grad)?;
    }

    Ok(total_sq_norm.sqrt())
}

/// Check if any gradient contains NaN or Inf
///
/// Returns true if gradients are healthy (no NaN/Inf). A gradient that
/// cannot be read back to the host counts as unhealthy.
pub fn check_gradients_health(grads: &GradStore, vars: &[Var]) -> bool {
    vars.iter()
        .filter_map(|var| grads.get(var.as_tensor()))
        .all(|grad| grad_values(grad).is_ok_and(|vals| vals.iter().all(|v| v.is_finite())))
}
