//! Activation Functions
//!
//! Normalisation and saturation used by the representation update.

use crate::{EmotionCoreError, Result};
use candle_core::Tensor;

/// Softmax activation along a dimension
///
/// Converts a vector of real numbers to a probability distribution. Runs in
/// the tensor's own precision.
pub fn softmax(tensor: &Tensor, dim: usize) -> Result<Tensor> {
    candle_nn::ops::softmax(tensor, dim)
        .map_err(|e| EmotionCoreError::Tensor(format!("Softmax failed: {}", e)))
}

/// Hard saturation to `[min, max]`.
///
/// Values outside the range are truncated to the boundary; nothing is
/// rescaled.
pub fn hard_clamp(tensor: &Tensor, min: f64, max: f64) -> Result<Tensor> {
    tensor
        .clamp(min, max)
        .map_err(|e| EmotionCoreError::Tensor(format!("clamp failed: {}", e)))
}
