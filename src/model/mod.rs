//! Representation Update Model
//!
//! Computes a bot's next emotional state from its current representation
//! and the incoming emotion composition:
//!
//! ```text
//! keys      = diag(representation)                 [7, 7]
//! scores    = attention(composition, keys)         [7, 7] or [7, 1]
//! collapsed = sum(scores, dim = 1)                 [7]
//! weights   = softmax(collapsed, dim = 0)          [7]
//! next      = clamp(W · weights + b, -1, 1)        [7]
//! ```
//!
//! [`EmotionModel::evolve`] folds this update left to right over a sequence
//! of turns, appending one representation per composition.
//!
//! Every intermediate runs in the configured precision on the configured
//! device.

mod checkpoint;

pub use checkpoint::CheckpointMetadata;

use crate::attention::{AttentionKind, AttentionScorer};
use crate::config::EmotionModelConfig;
use crate::emotion::{EmotionVector, EMOTION_DIM};
use crate::primitives::{diag, ensure_shape, hard_clamp, softmax, ForwardMode, Projection};
use crate::{EmotionCoreError, Result};
use candle_core::{DType, Device, Tensor, Var};
use tracing::{debug, info};

/// Attention-based emotion representation update model
#[derive(Debug)]
pub struct EmotionModel {
    config: EmotionModelConfig,
    dtype: DType,
    device: Device,
    attention: Box<dyn AttentionScorer>,
    projection: Projection,
    mode: ForwardMode,
}

impl EmotionModel {
    /// Build a model from configuration.
    ///
    /// Fails with a configuration error on invalid dropout, scaler or an
    /// unavailable device. Starts in eval mode.
    pub fn new(config: EmotionModelConfig) -> Result<Self> {
        config.validate()?;
        let device = config.device.resolve()?;
        let dtype = config.precision.dtype();

        let attention = config
            .attention
            .build(config.dropout, config.scaler, dtype, &device)?;
        let projection = Projection::new(EMOTION_DIM, EMOTION_DIM, config.bias, dtype, &device)?;
        Self::check_precision(&projection, &config, dtype, &device)?;

        info!(
            attention = %config.attention,
            precision = %config.precision,
            device = %config.device,
            "🧠 Emotion model ready ({} parameters)",
            attention
                .named_vars()
                .iter()
                .map(|(_, v)| v.as_tensor().elem_count())
                .sum::<usize>()
                + projection.param_count()
        );

        Ok(Self {
            config,
            dtype,
            device,
            attention,
            projection,
            mode: ForwardMode::Eval,
        })
    }

    /// Not every backend implements every op in every precision (bf16
    /// matmul on the CPU, for one), so run the projection once on zeros.
    fn check_precision(
        projection: &Projection,
        config: &EmotionModelConfig,
        dtype: DType,
        device: &Device,
    ) -> Result<()> {
        let zeros = Tensor::zeros(EMOTION_DIM, dtype, device)?;
        projection
            .forward(&zeros)
            .map(|_| ())
            .map_err(|e| {
                EmotionCoreError::Config(format!(
                    "{} precision is not supported on {}: {}",
                    config.precision, config.device, e
                ))
            })
    }

    pub fn config(&self) -> &EmotionModelConfig {
        &self.config
    }

    pub fn attention_kind(&self) -> AttentionKind {
        self.attention.kind()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Enable dropout
    pub fn train(&mut self) {
        self.mode = ForwardMode::Train;
    }

    /// Disable dropout
    pub fn eval(&mut self) {
        self.mode = ForwardMode::Eval;
    }

    pub fn mode(&self) -> ForwardMode {
        self.mode
    }

    /// One update step on tensors.
    ///
    /// `representation` and `composition` must both be `[7]`; they are cast
    /// to the model's precision and device. Gradients flow through the
    /// result.
    pub fn forward(&self, representation: &Tensor, composition: &Tensor) -> Result<Tensor> {
        ensure_shape(representation, &[EMOTION_DIM])?;
        ensure_shape(composition, &[EMOTION_DIM])?;

        let representation = representation.to_dtype(self.dtype)?.to_device(&self.device)?;
        let composition = composition.to_dtype(self.dtype)?.to_device(&self.device)?;

        let keys = diag(&representation)?;
        let decomposed = self.attention.score(&composition, &keys, self.mode)?;
        let decomposed = decomposed.to_dtype(self.dtype)?;

        let attention_matrix = decomposed
            .sum(1)
            .map_err(|e| EmotionCoreError::Tensor(format!("attention row sum failed: {}", e)))?;
        let attention_score = softmax(&attention_matrix, 0)?;

        let projected = self.projection.forward(&attention_score)?;
        hard_clamp(&projected, -1.0, 1.0)
    }

    /// One update step on plain vectors.
    pub fn step(&self, representation: &EmotionVector, composition: &EmotionVector) -> Result<EmotionVector> {
        let r = representation.to_tensor(self.dtype, &self.device)?;
        let c = composition.to_tensor(self.dtype, &self.device)?;
        EmotionVector::from_tensor(&self.forward(&r, &c)?)
    }

    /// Extend `trajectory` by one representation per composition.
    ///
    /// Each composition updates the most recently appended representation,
    /// so state flows from step to step. The existing entries are returned
    /// untouched, followed by `compositions.len()` new ones.
    pub fn evolve(&self, mut trajectory: Vec<Tensor>, compositions: &[Tensor]) -> Result<Vec<Tensor>> {
        if trajectory.is_empty() {
            return Err(EmotionCoreError::EmptyTrajectory);
        }
        trajectory.reserve(compositions.len());

        for composition in compositions {
            let current = trajectory.last().ok_or(EmotionCoreError::EmptyTrajectory)?;
            let next = self.forward(current, composition)?;
            trajectory.push(next);
        }

        debug!(
            turns = compositions.len(),
            length = trajectory.len(),
            "evolved representation trajectory"
        );
        Ok(trajectory)
    }

    /// [`evolve`](Self::evolve) on plain vectors.
    pub fn evolve_vectors(
        &self,
        trajectory: Vec<EmotionVector>,
        compositions: &[EmotionVector],
    ) -> Result<Vec<EmotionVector>> {
        let seed = trajectory
            .iter()
            .map(|v| v.to_tensor(self.dtype, &self.device))
            .collect::<Result<Vec<_>>>()?;
        let inputs = compositions
            .iter()
            .map(|v| v.to_tensor(self.dtype, &self.device))
            .collect::<Result<Vec<_>>>()?;

        let seed_len = seed.len();
        let evolved = self.evolve(seed, &inputs)?;

        let mut out = trajectory;
        for t in &evolved[seed_len..] {
            out.push(EmotionVector::from_tensor(t)?);
        }
        Ok(out)
    }

    /// New representations for a turn sequence stacked into `[n, 7]`.
    ///
    /// The seed is not included. Used as training logits.
    pub fn evolve_stacked(&self, seed: &Tensor, compositions: &[Tensor]) -> Result<Tensor> {
        if compositions.is_empty() {
            return Err(EmotionCoreError::Training(
                "cannot stack an empty turn sequence".into(),
            ));
        }
        let trajectory = self.evolve(vec![seed.clone()], compositions)?;
        Tensor::stack(&trajectory[1..], 0)
            .map_err(|e| EmotionCoreError::Tensor(format!("trajectory stack failed: {}", e)))
    }

    /// Learned parameters under their checkpoint names
    pub fn named_vars(&self) -> Vec<(String, Var)> {
        let mut vars: Vec<(String, Var)> = self
            .attention
            .named_vars()
            .into_iter()
            .map(|(name, var)| (name.to_string(), var))
            .collect();
        vars.push(("projection.weight".into(), self.projection.weight().clone()));
        if let Some(bias) = self.projection.bias() {
            vars.push(("projection.bias".into(), bias.clone()));
        }
        vars
    }

    /// Get trainable variables for optimization
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.named_vars().into_iter().map(|(_, v)| v).collect()
    }

    /// Total parameter count
    pub fn param_count(&self) -> usize {
        self.trainable_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Precision;
    use crate::emotion::Emotion;

    fn model(kind: AttentionKind) -> EmotionModel {
        EmotionModel::new(EmotionModelConfig::default().with_attention(kind)).unwrap()
    }

    fn composition(values: [f32; 7]) -> EmotionVector {
        EmotionVector::new(values)
    }

    #[test]
    fn test_update_is_bounded_for_every_kind() {
        let inputs = [
            composition([5.0, -3.0, 0.0, 2.0, 10.0, -8.0, 1.0]),
            composition([0.0; 7]),
            composition([1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]),
        ];
        for kind in AttentionKind::ALL {
            let m = model(kind);
            let mut rep = EmotionVector::one_hot(Emotion::Neutral);
            for c in &inputs {
                rep = m.step(&rep, c).unwrap();
                assert!(rep.is_bounded(), "{:?} produced {:?}", kind, rep);
            }
        }
    }

    #[test]
    fn test_forward_rejects_wrong_length() {
        let m = model(AttentionKind::DotProduct);
        let r = Tensor::zeros(7, DType::F32, &Device::Cpu).unwrap();
        let c = Tensor::zeros(6, DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            m.forward(&r, &c),
            Err(EmotionCoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_forward_runs_in_configured_precision() {
        let m = EmotionModel::new(
            EmotionModelConfig::default()
                .with_attention(AttentionKind::Additive)
                .with_precision(Precision::F64),
        )
        .unwrap();
        let r = Tensor::zeros(7, DType::F32, &Device::Cpu).unwrap();
        let c = Tensor::ones(7, DType::F32, &Device::Cpu).unwrap();
        let out = m.forward(&r, &c).unwrap();
        assert_eq!(out.dtype(), DType::F64);
        assert_eq!(out.dims(), &[7]);
    }

    #[test]
    fn test_evolve_appends_one_per_composition() {
        let m = model(AttentionKind::ScaledDotProduct);
        let seed = vec![
            EmotionVector::one_hot(Emotion::Happiness),
            EmotionVector::new([0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]),
        ];
        let turns = vec![composition([0.2; 7]); 3];

        let trajectory = m.evolve_vectors(seed.clone(), &turns).unwrap();
        assert_eq!(trajectory.len(), seed.len() + turns.len());
        assert_eq!(&trajectory[..seed.len()], seed.as_slice());
    }

    #[test]
    fn test_evolve_is_a_left_fold() {
        let m = model(AttentionKind::DualLinear);
        let seed = EmotionVector::one_hot(Emotion::Fear);
        let turns = vec![
            composition([0.1, 0.0, 0.0, 0.6, 0.1, 0.1, 0.1]),
            composition([0.0, 0.5, 0.2, 0.1, 0.0, 0.2, 0.0]),
        ];

        let trajectory = m.evolve_vectors(vec![seed], &turns).unwrap();
        let first = m.step(&seed, &turns[0]).unwrap();
        let second = m.step(&first, &turns[1]).unwrap();

        for (a, b) in trajectory[1].0.iter().zip(first.0.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        for (a, b) in trajectory[2].0.iter().zip(second.0.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_evolve_without_turns_is_identity() {
        let m = model(AttentionKind::DotProduct);
        let seed = vec![EmotionVector::one_hot(Emotion::Sadness)];
        assert_eq!(m.evolve_vectors(seed.clone(), &[]).unwrap(), seed);
    }

    #[test]
    fn test_evolve_rejects_empty_trajectory() {
        let m = model(AttentionKind::DotProduct);
        assert!(matches!(
            m.evolve_vectors(Vec::new(), &[composition([0.0; 7])]),
            Err(EmotionCoreError::EmptyTrajectory)
        ));
    }

    #[test]
    fn test_evolve_stacked_shape() {
        let m = model(AttentionKind::Additive);
        let seed = EmotionVector::one_hot(Emotion::Neutral)
            .to_tensor(DType::F32, &Device::Cpu)
            .unwrap();
        let turns: Vec<Tensor> = (0..4)
            .map(|_| composition([0.3; 7]).to_tensor(DType::F32, &Device::Cpu).unwrap())
            .collect();
        let stacked = m.evolve_stacked(&seed, &turns).unwrap();
        assert_eq!(stacked.dims(), &[4, 7]);
    }

    #[test]
    fn test_named_vars_per_kind() {
        let names = |kind| -> Vec<String> {
            model(kind).named_vars().into_iter().map(|(n, _)| n).collect()
        };
        assert_eq!(
            names(AttentionKind::DotProduct),
            vec!["projection.weight", "projection.bias"]
        );
        assert_eq!(
            names(AttentionKind::Additive),
            vec![
                "attention.w_q",
                "attention.w_k",
                "attention.w_v",
                "projection.weight",
                "projection.bias"
            ]
        );

        let no_bias = EmotionModel::new(EmotionModelConfig {
            bias: false,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(no_bias.param_count(), 49 * 3);
    }

    #[test]
    fn test_unsupported_precision_fails_at_construction() {
        let config = EmotionModelConfig::default().with_precision(Precision::BF16);
        assert!(matches!(
            EmotionModel::new(config),
            Err(EmotionCoreError::Config(_))
        ));

        let half = EmotionModel::new(EmotionModelConfig::default().with_precision(Precision::F16));
        if let Ok(model) = half {
            let rep = EmotionVector::one_hot(Emotion::Neutral);
            assert!(model.step(&rep, &composition([0.2; 7])).is_ok());
        }
    }

    #[test]
    fn test_mode_toggle() {
        let mut m = model(AttentionKind::DualLinear);
        assert_eq!(m.mode(), ForwardMode::Eval);
        m.train();
        assert_eq!(m.mode(), ForwardMode::Train);
        m.eval();
        assert_eq!(m.mode(), ForwardMode::Eval);
    }
}
