//! Attention scorer implementations

use super::{AttentionKind, AttentionScorer};
use crate::emotion::EMOTION_DIM;
use crate::primitives::{ensure_shape, Dropout, ForwardMode, Projection};
use crate::{EmotionCoreError, Result};
use candle_core::{DType, Device, Tensor, Var};
use std::sync::OnceLock;

fn check_inputs(query: &Tensor, keys: &Tensor) -> Result<()> {
    ensure_shape(query, &[EMOTION_DIM])?;
    ensure_shape(keys, &[EMOTION_DIM, EMOTION_DIM])
}

// =============================================================================
// Dot product
// =============================================================================

/// `query ⊙ keys`, broadcast over the rows of `keys`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotProductAttention;

impl DotProductAttention {
    pub fn new() -> Self {
        Self
    }
}

impl AttentionScorer for DotProductAttention {
    fn kind(&self) -> AttentionKind {
        AttentionKind::DotProduct
    }

    fn score(&self, query: &Tensor, keys: &Tensor, _mode: ForwardMode) -> Result<Tensor> {
        check_inputs(query, keys)?;
        keys.broadcast_mul(query)
            .map_err(|e| EmotionCoreError::Tensor(format!("dot product attention failed: {}", e)))
    }
}

// =============================================================================
// Scaled dot product
// =============================================================================

/// `query ⊙ keys / sqrt(scale)`.
///
/// Without an explicit scaler, the scale is the query's trailing dimension
/// on the first call and stays fixed afterwards. Use [`reset_scale`] to
/// forget it.
///
/// [`reset_scale`]: ScaledDotProductAttention::reset_scale
#[derive(Debug)]
pub struct ScaledDotProductAttention {
    configured: Option<f64>,
    scale: OnceLock<f64>,
}

impl ScaledDotProductAttention {
    pub fn new(scaler: Option<f64>) -> Result<Self> {
        if let Some(s) = scaler {
            if !(s.is_finite() && s > 0.0) {
                return Err(EmotionCoreError::OutOfRange {
                    name: "scaler".into(),
                    value: s,
                    bound: "(0, inf)",
                });
            }
        }
        let scale = OnceLock::new();
        if let Some(s) = scaler {
            let _ = scale.set(s);
        }
        Ok(Self {
            configured: scaler,
            scale,
        })
    }

    /// Current scale, if fixed yet
    pub fn scale(&self) -> Option<f64> {
        self.scale.get().copied()
    }

    /// Back to the configured scaler, or unset if none was given.
    pub fn reset_scale(&mut self) {
        self.scale = OnceLock::new();
        if let Some(s) = self.configured {
            let _ = self.scale.set(s);
        }
    }
}

impl AttentionScorer for ScaledDotProductAttention {
    fn kind(&self) -> AttentionKind {
        AttentionKind::ScaledDotProduct
    }

    fn score(&self, query: &Tensor, keys: &Tensor, _mode: ForwardMode) -> Result<Tensor> {
        check_inputs(query, keys)?;
        let scale = *self
            .scale
            .get_or_init(|| query.dims().last().copied().unwrap_or(EMOTION_DIM) as f64);

        keys.broadcast_mul(query)?
            .affine(1.0 / scale.sqrt(), 0.0)
            .map_err(|e| EmotionCoreError::Tensor(format!("scaled attention failed: {}", e)))
    }
}

// =============================================================================
// Additive
// =============================================================================

/// `W_v(dropout(W_q q) + dropout(W_k K))`, one scalar per key row.
#[derive(Debug)]
pub struct AdditiveAttention {
    w_q: Projection,
    w_k: Projection,
    w_v: Projection,
    dropout: Dropout,
}

impl AdditiveAttention {
    pub fn new(dropout: f32, dtype: DType, device: &Device) -> Result<Self> {
        Ok(Self {
            w_q: Projection::new(EMOTION_DIM, EMOTION_DIM, false, dtype, device)?,
            w_k: Projection::new(EMOTION_DIM, EMOTION_DIM, false, dtype, device)?,
            w_v: Projection::new(EMOTION_DIM, 1, false, dtype, device)?,
            dropout: Dropout::new(dropout)?,
        })
    }
}

impl AttentionScorer for AdditiveAttention {
    fn kind(&self) -> AttentionKind {
        AttentionKind::Additive
    }

    fn score(&self, query: &Tensor, keys: &Tensor, mode: ForwardMode) -> Result<Tensor> {
        check_inputs(query, keys)?;
        let q = self.dropout.forward(&self.w_q.forward(query)?, mode)?;
        let k = self.dropout.forward(&self.w_k.forward(keys)?, mode)?;

        let combined = k
            .broadcast_add(&q)
            .map_err(|e| EmotionCoreError::Tensor(format!("additive attention sum failed: {}", e)))?;
        self.w_v.forward(&combined)
    }

    fn named_vars(&self) -> Vec<(&'static str, Var)> {
        vec![
            ("attention.w_q", self.w_q.weight().clone()),
            ("attention.w_k", self.w_k.weight().clone()),
            ("attention.w_v", self.w_v.weight().clone()),
        ]
    }
}

// =============================================================================
// Dual linear
// =============================================================================

/// `dropout(W_q q) ⊙ dropout(W_k K)`, keeping 7 outputs per key row.
#[derive(Debug)]
pub struct DualLinearAttention {
    w_q: Projection,
    w_k: Projection,
    dropout: Dropout,
}

impl DualLinearAttention {
    pub fn new(dropout: f32, dtype: DType, device: &Device) -> Result<Self> {
        Ok(Self {
            w_q: Projection::new(EMOTION_DIM, EMOTION_DIM, false, dtype, device)?,
            w_k: Projection::new(EMOTION_DIM, EMOTION_DIM, false, dtype, device)?,
            dropout: Dropout::new(dropout)?,
        })
    }
}

impl AttentionScorer for DualLinearAttention {
    fn kind(&self) -> AttentionKind {
        AttentionKind::DualLinear
    }

    fn score(&self, query: &Tensor, keys: &Tensor, mode: ForwardMode) -> Result<Tensor> {
        check_inputs(query, keys)?;
        let q = self.dropout.forward(&self.w_q.forward(query)?, mode)?;
        let k = self.dropout.forward(&self.w_k.forward(keys)?, mode)?;

        k.broadcast_mul(&q)
            .map_err(|e| EmotionCoreError::Tensor(format!("dual linear attention failed: {}", e)))
    }

    fn named_vars(&self) -> Vec<(&'static str, Var)> {
        vec![
            ("attention.w_q", self.w_q.weight().clone()),
            ("attention.w_k", self.w_k.weight().clone()),
        ]
    }
}
