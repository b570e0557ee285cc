//! Emotion compositions and seed representations
//!
//! Helpers that sit between an external sentiment classifier and the
//! representation model: ordering classifier scores into a composition
//! vector, and producing seed or ideal representations.

use super::{Emotion, EmotionVector, EMOTION_DIM};
use crate::primitives::{hard_clamp, softmax};
use crate::{EmotionCoreError, Result};
use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;
use tracing::debug;

/// Rejection-sampling budget for [`dummy_representation`].
pub const MAX_SAMPLING_ATTEMPTS: usize = 10_000;

/// Turn classifier `(label, score)` pairs into an emotion composition.
///
/// Scores are reordered into [`Emotion::ALL`] order and passed through a
/// softmax. Every label must appear; unknown labels are rejected. When a
/// label is repeated the last score wins.
pub fn sentiment_composition<S: AsRef<str>>(scores: &[(S, f32)]) -> Result<EmotionVector> {
    let mut by_label: HashMap<Emotion, f32> = HashMap::with_capacity(EMOTION_DIM);
    for (label, score) in scores {
        by_label.insert(label.as_ref().parse()?, *score);
    }

    let mut ordered = [0.0f32; EMOTION_DIM];
    for emotion in Emotion::ALL {
        ordered[emotion.index()] = *by_label.get(&emotion).ok_or_else(|| {
            EmotionCoreError::Config(format!("missing sentiment score for '{}'", emotion))
        })?;
    }

    let logits = Tensor::from_slice(&ordered, EMOTION_DIM, &Device::Cpu)?;
    EmotionVector::from_tensor(&softmax(&logits, 0)?)
}

/// Random representation whose dominant emotion is `target`.
///
/// Draws uniform vectors, clamps them to [-1, 1] and keeps the first whose
/// argmax matches.
pub fn dummy_representation(target: Emotion, device: &Device) -> Result<EmotionVector> {
    for attempt in 0..MAX_SAMPLING_ATTEMPTS {
        let sample = hard_clamp(&Tensor::rand(0.0f32, 1.0, EMOTION_DIM, device)?, -1.0, 1.0)?;
        let vector = EmotionVector::from_tensor(&sample)?;
        if vector.argmax() == target {
            debug!(%target, attempt, "sampled dummy representation");
            return Ok(vector);
        }
    }
    Err(EmotionCoreError::Tensor(format!(
        "no representation dominated by '{}' after {} samples",
        target, MAX_SAMPLING_ATTEMPTS
    )))
}

/// Ideal representation from an optional emotion tendency.
///
/// Given a tendency, missing emotions default to 0 and every value is
/// clamped to [-1, 1]. Without one, a uniform random vector in [-1, 1] is
/// drawn.
pub fn ideal_representation(
    tendency: Option<&HashMap<Emotion, f32>>,
    device: &Device,
) -> Result<EmotionVector> {
    match tendency {
        Some(map) => {
            let mut values = [0.0f32; EMOTION_DIM];
            for (emotion, value) in map {
                values[emotion.index()] = value.clamp(-1.0, 1.0);
            }
            Ok(EmotionVector(values))
        }
        None => {
            let sample = Tensor::rand(-1.0f32, 1.0, EMOTION_DIM, device)?.to_dtype(DType::F32)?;
            EmotionVector::from_tensor(&sample)
        }
    }
}
