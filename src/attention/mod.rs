//! Attention Scorers
//!
//! Compatibility signal between a query (the incoming emotion composition,
//! `[7]`) and keys (the diagonalised current representation, `[7, 7]`).
//!
//! | Kind | Output | Parameters |
//! |---|---|---|
//! | [`DotProductAttention`] | `[7, 7]` | none |
//! | [`ScaledDotProductAttention`] | `[7, 7]` | scale, fixed on first use |
//! | [`AdditiveAttention`] | `[7, 1]` | `W_q`, `W_k` (7→7), `W_v` (7→1), dropout |
//! | [`DualLinearAttention`] | `[7, 7]` | `W_q`, `W_k` (7→7), dropout |
//!
//! Scorers are chosen from the closed [`AttentionKind`] enumeration when the
//! model is built; an unknown name never reaches a forward pass.

mod scorers;

pub use scorers::{
    AdditiveAttention, DotProductAttention, DualLinearAttention, ScaledDotProductAttention,
};

use crate::primitives::ForwardMode;
use crate::{EmotionCoreError, Result};
use candle_core::{DType, Device, Tensor, Var};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Score a query against keys.
pub trait AttentionScorer: fmt::Debug + Send + Sync {
    /// Which variant this is
    fn kind(&self) -> AttentionKind;

    /// `query: [7]`, `keys: [7, 7]` → per-row attention output.
    ///
    /// Shapes are validated on every call.
    fn score(&self, query: &Tensor, keys: &Tensor, mode: ForwardMode) -> Result<Tensor>;

    /// Learned parameters under stable checkpoint names
    fn named_vars(&self) -> Vec<(&'static str, Var)> {
        Vec::new()
    }
}

/// Closed set of attention variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionKind {
    DotProduct,
    ScaledDotProduct,
    Additive,
    #[default]
    DualLinear,
}

impl AttentionKind {
    pub const ALL: [AttentionKind; 4] = [
        Self::DotProduct,
        Self::ScaledDotProduct,
        Self::Additive,
        Self::DualLinear,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::DotProduct => "dot_product",
            Self::ScaledDotProduct => "scaled_dot_product",
            Self::Additive => "additive",
            Self::DualLinear => "dual_linear",
        }
    }

    /// Whether this variant owns learned parameters
    pub fn is_learned(self) -> bool {
        matches!(self, Self::Additive | Self::DualLinear)
    }

    /// Construct the scorer for this variant.
    ///
    /// `dropout` applies to the learned variants, `scaler` to the scaled
    /// dot product only.
    pub fn build(
        self,
        dropout: f32,
        scaler: Option<f64>,
        dtype: DType,
        device: &Device,
    ) -> Result<Box<dyn AttentionScorer>> {
        Ok(match self {
            Self::DotProduct => Box::new(DotProductAttention::new()),
            Self::ScaledDotProduct => Box::new(ScaledDotProductAttention::new(scaler)?),
            Self::Additive => Box::new(AdditiveAttention::new(dropout, dtype, device)?),
            Self::DualLinear => Box::new(DualLinearAttention::new(dropout, dtype, device)?),
        })
    }
}

impl fmt::Display for AttentionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttentionKind {
    type Err = EmotionCoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s.trim())
            .ok_or_else(|| {
                EmotionCoreError::Config(format!(
                    "{} should be any of {}",
                    s,
                    Self::ALL.map(AttentionKind::name).join(",")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        for kind in AttentionKind::ALL {
            assert_eq!(kind.name().parse::<AttentionKind>().unwrap(), kind);
        }
        let err = "multi_head".parse::<AttentionKind>().unwrap_err();
        assert!(err.to_string().contains("multi_head"));
        assert!(err.to_string().contains("dual_linear"));
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&AttentionKind::ScaledDotProduct).unwrap();
        assert_eq!(json, "\"scaled_dot_product\"");
        assert!(serde_json::from_str::<AttentionKind>("\"luong\"").is_err());
    }

    #[test]
    fn test_build_every_kind() {
        for kind in AttentionKind::ALL {
            let scorer = kind.build(0.5, None, DType::F32, &Device::Cpu).unwrap();
            assert_eq!(scorer.kind(), kind);
            assert_eq!(scorer.named_vars().is_empty(), !kind.is_learned());
        }
    }
}
