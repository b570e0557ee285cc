//! Learned layers
//!
//! Fixed-size linear projections backed by raw [`Var`]s, plus a dropout
//! wrapper that is only active in training mode.

use crate::{EmotionCoreError, Result};
use candle_core::{DType, Device, Tensor, Var};

/// Whether a forward pass runs with training-only behaviour (dropout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardMode {
    /// Dropout active
    Train,
    /// Dropout is the identity
    #[default]
    Eval,
}

impl ForwardMode {
    pub fn is_train(self) -> bool {
        matches!(self, Self::Train)
    }
}

/// Linear map `y = x Wᵀ + b` with `W: [out_dim, in_dim]`.
///
/// Accepts inputs of shape `[in_dim]` or `[rows, in_dim]`.
#[derive(Debug, Clone)]
pub struct Projection {
    in_dim: usize,
    out_dim: usize,
    weight: Var,
    bias: Option<Var>,
}

impl Projection {
    /// Create a projection with uniform `±1/sqrt(in_dim)` initialisation.
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        bias: bool,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let bound = 1.0f32 / (in_dim as f32).sqrt();

        let weight = Tensor::rand(-bound, bound, (out_dim, in_dim), device)
            .and_then(|t| t.to_dtype(dtype))
            .and_then(|t| Var::from_tensor(&t))
            .map_err(|e| EmotionCoreError::Tensor(format!("Failed to create weight: {}", e)))?;

        let bias = if bias {
            let b = Tensor::rand(-bound, bound, out_dim, device)
                .and_then(|t| t.to_dtype(dtype))
                .and_then(|t| Var::from_tensor(&t))
                .map_err(|e| EmotionCoreError::Tensor(format!("Failed to create bias: {}", e)))?;
            Some(b)
        } else {
            None
        };

        Ok(Self {
            in_dim,
            out_dim,
            weight,
            bias,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn weight(&self) -> &Var {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Var> {
        self.bias.as_ref()
    }

    /// Forward pass; the trailing dimension must equal `in_dim`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let dims = x.dims();
        if dims.last() != Some(&self.in_dim) || dims.len() > 2 {
            let mut expected = dims.to_vec();
            match expected.last_mut() {
                Some(last) => *last = self.in_dim,
                None => expected.push(self.in_dim),
            }
            return Err(EmotionCoreError::DimensionMismatch {
                expected,
                actual: dims.to_vec(),
            });
        }

        let is_vector = dims.len() == 1;
        let x2 = if is_vector { x.unsqueeze(0)? } else { x.clone() };

        let mut out = x2
            .matmul(&self.weight.as_tensor().t()?)
            .map_err(|e| EmotionCoreError::Tensor(format!("projection matmul failed: {}", e)))?;

        if let Some(bias) = &self.bias {
            out = out
                .broadcast_add(bias.as_tensor())
                .map_err(|e| EmotionCoreError::Tensor(format!("projection bias failed: {}", e)))?;
        }

        if is_vector {
            Ok(out.squeeze(0)?)
        } else {
            Ok(out)
        }
    }

    /// Trainable variables (weight first, then bias if present)
    pub fn vars(&self) -> Vec<Var> {
        let mut vars = vec![self.weight.clone()];
        if let Some(b) = &self.bias {
            vars.push(b.clone());
        }
        vars
    }

    pub fn param_count(&self) -> usize {
        self.vars().iter().map(|v| v.as_tensor().elem_count()).sum()
    }
}

/// Dropout with inverted scaling, active only in [`ForwardMode::Train`].
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    rate: f32,
}

impl Dropout {
    /// `rate` must lie in `[0, 1)`.
    pub fn new(rate: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(EmotionCoreError::OutOfRange {
                name: "dropout".into(),
                value: rate as f64,
                bound: "[0, 1)",
            });
        }
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn forward(&self, x: &Tensor, mode: ForwardMode) -> Result<Tensor> {
        if !mode.is_train() || self.rate == 0.0 {
            return Ok(x.clone());
        }
        candle_nn::ops::dropout(x, self.rate)
            .map_err(|e| EmotionCoreError::Tensor(format!("dropout failed: {}", e)))
    }
}
