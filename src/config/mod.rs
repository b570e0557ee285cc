//! Configuration
//!
//! Scalar configuration for the model, the similarity analyser and training,
//! loadable from a TOML or JSON file:
//!
//! ```toml
//! [model]
//! attention = "dual_linear"
//! dropout = 0.5
//! bias = true
//! precision = "float32"
//! device = "cpu"
//!
//! [similarity]
//! threshold = 0.7
//! fallback_threshold = 0.5
//!
//! [learning]
//! learning_rate = 0.001
//! epochs = 3
//! ```

use crate::attention::AttentionKind;
use crate::primitives::best_device;
use crate::{EmotionCoreError, Result};
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

pub use crate::training::{LearningConfig, OptimizerKind};

// =============================================================================
// Precision
// =============================================================================

/// Floating-point precision every intermediate tensor runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Precision {
    F16,
    BF16,
    #[default]
    F32,
    F64,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Self::F16 => DType::F16,
            Self::BF16 => DType::BF16,
            Self::F32 => DType::F32,
            Self::F64 => DType::F64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::F16 => "float16",
            Self::BF16 => "bfloat16",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }
}

impl FromStr for Precision {
    type Err = EmotionCoreError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        let name = lowered.strip_prefix("torch.").unwrap_or(&lowered);
        match name {
            "float16" | "half" | "f16" => Ok(Self::F16),
            "bfloat16" | "bf16" => Ok(Self::BF16),
            "float32" | "float" | "f32" => Ok(Self::F32),
            "float64" | "double" | "f64" => Ok(Self::F64),
            _ => Err(EmotionCoreError::Config(format!(
                "{} should be any of float16,bfloat16,float32,float64",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Precision {
    type Error = EmotionCoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Precision> for String {
    fn from(value: Precision) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Device
// =============================================================================

/// Compute device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceSpec {
    /// Best available, see [`best_device`]
    Auto,
    #[default]
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl DeviceSpec {
    pub fn resolve(self) -> Result<Device> {
        match self {
            Self::Auto => Ok(best_device()),
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(ordinal) => Device::new_cuda(ordinal)
                .map_err(|e| EmotionCoreError::Config(format!("cuda:{} unavailable: {}", ordinal, e))),
            Self::Metal(ordinal) => Device::new_metal(ordinal)
                .map_err(|e| EmotionCoreError::Config(format!("metal:{} unavailable: {}", ordinal, e))),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = EmotionCoreError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        let (kind, ordinal) = match lowered.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal.parse::<usize>().map_err(|_| {
                    EmotionCoreError::Config(format!("invalid device ordinal in '{}'", s))
                })?;
                (kind, ordinal)
            }
            None => (lowered.as_str(), 0),
        };
        match kind {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(ordinal)),
            "metal" | "mps" => Ok(Self::Metal(ordinal)),
            _ => Err(EmotionCoreError::Config(format!(
                "{} should be any of auto,cpu,cuda[:n],metal[:n]",
                s
            ))),
        }
    }
}

impl TryFrom<String> for DeviceSpec {
    type Error = EmotionCoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceSpec> for String {
    fn from(value: DeviceSpec) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(n) => write!(f, "cuda:{}", n),
            Self::Metal(n) => write!(f, "metal:{}", n),
        }
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

/// Validate a similarity threshold against `(0, 1]`.
///
/// Out-of-range values fall back to `fallback` when one is given (the
/// fallback itself must be in range), otherwise fail with
/// [`EmotionCoreError::OutOfRange`].
pub fn validate_threshold(value: f32, fallback: Option<f32>) -> Result<f32> {
    let in_range = |t: f32| t > 0.0 && t <= 1.0;
    if in_range(value) {
        return Ok(value);
    }
    let err = EmotionCoreError::OutOfRange {
        name: "threshold".into(),
        value: value as f64,
        bound: "(0, 1]",
    };
    match fallback {
        Some(default) if in_range(default) => {
            warn!(%err, default, "threshold out of range, using fallback");
            Ok(default)
        }
        Some(default) => Err(EmotionCoreError::OutOfRange {
            name: "fallback_threshold".into(),
            value: default as f64,
            bound: "(0, 1]",
        }),
        None => Err(err),
    }
}

// =============================================================================
// Config structs
// =============================================================================

/// Representation update model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionModelConfig {
    /// Attention variant
    pub attention: AttentionKind,

    /// Dropout rate for the learned attention variants, in `[0, 1)`
    pub dropout: f32,

    /// Fixed scale for scaled dot-product attention (defaults to the query
    /// dimension on first use)
    pub scaler: Option<f64>,

    /// Whether the output projection has a bias
    pub bias: bool,

    pub precision: Precision,

    pub device: DeviceSpec,
}

impl Default for EmotionModelConfig {
    fn default() -> Self {
        Self {
            attention: AttentionKind::default(),
            dropout: 0.5,
            scaler: None,
            bias: true,
            precision: Precision::F32,
            device: DeviceSpec::Cpu,
        }
    }
}

impl EmotionModelConfig {
    pub fn with_attention(mut self, attention: AttentionKind) -> Self {
        self.attention = attention;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(EmotionCoreError::OutOfRange {
                name: "dropout".into(),
                value: self.dropout as f64,
                bound: "[0, 1)",
            });
        }
        if let Some(s) = self.scaler {
            if !(s.is_finite() && s > 0.0) {
                return Err(EmotionCoreError::OutOfRange {
                    name: "scaler".into(),
                    value: s,
                    bound: "(0, inf)",
                });
            }
        }
        Ok(())
    }
}

/// Similarity analyser settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Inclusive similarity ceiling, in `(0, 1]`
    pub threshold: f32,

    /// Used instead of an out-of-range threshold; `None` makes such values
    /// an error
    pub fallback_threshold: Option<f32>,

    pub precision: Precision,

    pub device: DeviceSpec,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            fallback_threshold: None,
            precision: Precision::F32,
            device: DeviceSpec::Cpu,
        }
    }
}

impl SimilarityConfig {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_fallback(mut self, fallback: f32) -> Self {
        self.fallback_threshold = Some(fallback);
        self
    }
}

/// Everything a pipeline run needs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: EmotionModelConfig,
    pub similarity: SimilarityConfig,
    pub learning: LearningConfig,
}

impl PipelineConfig {
    /// Load from a `.json` file, or TOML for any other extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(EmotionCoreError::Io)?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let config: Self = if is_json {
            serde_json::from_str(&content)
                .map_err(|e| EmotionCoreError::Config(format!("Failed to parse config: {}", e)))?
        } else {
            toml::from_str(&content)
                .map_err(|e| EmotionCoreError::Config(format!("Failed to parse config: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        validate_threshold(self.similarity.threshold, self.similarity.fallback_threshold)?;
        self.learning.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_precision_parse() {
        assert_eq!("torch.float32".parse::<Precision>().unwrap(), Precision::F32);
        assert_eq!("double".parse::<Precision>().unwrap(), Precision::F64);
        assert_eq!("BFloat16".parse::<Precision>().unwrap(), Precision::BF16);
        assert!("int8".parse::<Precision>().is_err());
        assert_eq!(Precision::F16.dtype(), DType::F16);
    }

    #[test]
    fn test_device_spec_parse() {
        assert_eq!("cpu".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cpu);
        assert_eq!("cuda".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(0));
        assert_eq!("cuda:1".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(1));
        assert_eq!("mps".parse::<DeviceSpec>().unwrap(), DeviceSpec::Metal(0));
        assert!("tpu".parse::<DeviceSpec>().is_err());
        assert!("cuda:x".parse::<DeviceSpec>().is_err());
        assert_eq!(DeviceSpec::Cuda(2).to_string(), "cuda:2");
    }

    #[test]
    fn test_cpu_resolves() {
        assert!(matches!(DeviceSpec::Cpu.resolve().unwrap(), Device::Cpu));
    }

    #[test]
    fn test_validate_threshold() {
        assert_eq!(validate_threshold(0.5, None).unwrap(), 0.5);
        assert_eq!(validate_threshold(1.0, None).unwrap(), 1.0);

        for bad in [0.0, 1.5, -0.1] {
            assert!(matches!(
                validate_threshold(bad, None),
                Err(EmotionCoreError::OutOfRange { .. })
            ));
            assert_eq!(validate_threshold(bad, Some(0.8)).unwrap(), 0.8);
        }

        assert!(validate_threshold(2.0, Some(3.0)).is_err());
    }

    #[test]
    fn test_model_config_validate() {
        assert!(EmotionModelConfig::default().validate().is_ok());

        let bad_dropout = EmotionModelConfig {
            dropout: 1.0,
            ..Default::default()
        };
        assert!(bad_dropout.validate().is_err());

        let bad_scaler = EmotionModelConfig {
            scaler: Some(0.0),
            ..Default::default()
        };
        assert!(bad_scaler.validate().is_err());
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
            [model]
            attention = "scaled_dot_product"
            precision = "torch.float64"
            scaler = 4.0

            [similarity]
            threshold = 0.7
            "#
        )
        .unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.model.attention, AttentionKind::ScaledDotProduct);
        assert_eq!(config.model.precision, Precision::F64);
        assert_eq!(config.model.scaler, Some(4.0));
        assert_eq!(config.model.dropout, 0.5);
        assert_eq!(config.similarity.threshold, 0.7);
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"model": {{"attention": "additive", "device": "cpu"}}, "similarity": {{"threshold": 0.9}}}}"#
        )
        .unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.model.attention, AttentionKind::Additive);
        assert_eq!(config.similarity.threshold, 0.9);
    }

    #[test]
    fn test_load_rejects_unknown_attention() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[model]\nattention = \"multi_head\"\n").unwrap();
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(EmotionCoreError::Config(_))
        ));
    }

    #[test]
    fn test_load_rejects_out_of_range_threshold() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[similarity]\nthreshold = 1.5\n").unwrap();
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(EmotionCoreError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_config_serde_roundtrip_names() {
        let config = PipelineConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["model"]["attention"], "dual_linear");
        assert_eq!(json["model"]["precision"], "float32");
        assert_eq!(json["model"]["device"], "cpu");
    }
}
