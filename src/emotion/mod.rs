//! Emotion label set and fixed-size emotion vectors
//!
//! Every 7-dimensional vector in this crate is indexed by [`Emotion::ALL`].
//! Representation vectors, emotion compositions, similarity candidates and
//! evaluation labels all share this ordering.

pub mod composition;

pub use composition::{dummy_representation, ideal_representation, sentiment_composition};

use crate::{EmotionCoreError, Result};
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Dimensionality of every emotion vector.
pub const EMOTION_DIM: usize = 7;

/// The fixed, ordered emotion label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Anger,
    Disgust,
    Fear,
    Happiness,
    Sadness,
    Surprise,
}

impl Emotion {
    /// All labels in index order.
    pub const ALL: [Emotion; EMOTION_DIM] = [
        Self::Neutral,
        Self::Anger,
        Self::Disgust,
        Self::Fear,
        Self::Happiness,
        Self::Sadness,
        Self::Surprise,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Anger => "anger",
            Self::Disgust => "disgust",
            Self::Fear => "fear",
            Self::Happiness => "happiness",
            Self::Sadness => "sadness",
            Self::Surprise => "surprise",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Emotion {
    type Err = EmotionCoreError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.name() == lowered)
            .ok_or_else(|| {
                EmotionCoreError::Config(format!(
                    "unknown emotion '{}', expected one of {}",
                    s,
                    Self::ALL.map(Emotion::name).join(",")
                ))
            })
    }
}

/// A length-7 real vector indexed by [`Emotion`].
///
/// Used both for bounded representation vectors and for unbounded
/// emotion compositions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionVector(pub [f32; EMOTION_DIM]);

impl EmotionVector {
    pub const fn new(values: [f32; EMOTION_DIM]) -> Self {
        Self(values)
    }

    /// Unit vector on a single emotion.
    pub fn one_hot(emotion: Emotion) -> Self {
        let mut values = [0.0; EMOTION_DIM];
        values[emotion.index()] = 1.0;
        Self(values)
    }

    pub fn from_slice(values: &[f32]) -> Result<Self> {
        let array: [f32; EMOTION_DIM] =
            values
                .try_into()
                .map_err(|_| EmotionCoreError::DimensionMismatch {
                    expected: vec![EMOTION_DIM],
                    actual: vec![values.len()],
                })?;
        Ok(Self(array))
    }

    /// Read a `[7]` tensor of any float precision.
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        crate::primitives::ensure_shape(tensor, &[EMOTION_DIM])?;
        let values = tensor.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        Self::from_slice(&values)
    }

    /// Read every row of an `[N, 7]` tensor.
    pub fn rows_from_tensor(tensor: &Tensor) -> Result<Vec<Self>> {
        let (_, cols) = tensor.dims2()?;
        if cols != EMOTION_DIM {
            return Err(EmotionCoreError::DimensionMismatch {
                expected: vec![tensor.dims()[0], EMOTION_DIM],
                actual: tensor.dims().to_vec(),
            });
        }
        tensor
            .to_dtype(DType::F32)?
            .to_vec2::<f32>()?
            .iter()
            .map(|row| Self::from_slice(row))
            .collect()
    }

    pub fn to_tensor(&self, dtype: DType, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.0, EMOTION_DIM, device)?.to_dtype(dtype)?)
    }

    pub fn values(&self) -> &[f32; EMOTION_DIM] {
        &self.0
    }

    pub fn get(&self, emotion: Emotion) -> f32 {
        self.0[emotion.index()]
    }

    /// Dominant emotion; ties resolve to the lowest index.
    pub fn argmax(&self) -> Emotion {
        let mut best = 0;
        for (i, v) in self.0.iter().enumerate() {
            if *v > self.0[best] {
                best = i;
            }
        }
        Emotion::ALL[best]
    }

    /// Whether every component lies in [-1, 1].
    pub fn is_bounded(&self) -> bool {
        self.0.iter().all(|v| (-1.0..=1.0).contains(v))
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

impl From<[f32; EMOTION_DIM]> for EmotionVector {
    fn from(values: [f32; EMOTION_DIM]) -> Self {
        Self(values)
    }
}

/// Stack vectors into an `[N, 7]` tensor.
pub fn stack_vectors(vectors: &[EmotionVector], dtype: DType, device: &Device) -> Result<Tensor> {
    let flat: Vec<f32> = vectors.iter().flat_map(|v| v.0).collect();
    Ok(Tensor::from_vec(flat, (vectors.len(), EMOTION_DIM), device)?.to_dtype(dtype)?)
}
