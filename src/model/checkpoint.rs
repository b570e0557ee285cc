//! Checkpoint persistence
//!
//! Learned parameters are stored in a safetensors file under stable names;
//! an optional `.meta.json` sidecar records version and config hash.

use super::EmotionModel;
use crate::{EmotionCoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Serialize)]
struct ArchitectureKey {
    attention: &'static str,
    scaler: Option<f64>,
    bias: bool,
}

/// Metadata written next to a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Model name
    pub name: String,

    /// Semantic version of the trained weights
    pub version: String,

    /// SHA-256 of the serialised model configuration
    pub config_hash: String,

    /// When training finished
    pub trained_at: DateTime<Utc>,

    /// Number of learned scalars
    pub param_count: usize,
}

impl CheckpointMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>, model: &EmotionModel) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            version: version.into(),
            config_hash: model.config_hash()?,
            trained_at: Utc::now(),
            param_count: model.param_count(),
        })
    }
}

impl EmotionModel {
    /// SHA-256 over the parameter-shaping part of the configuration:
    /// attention variant, scaler and projection bias.
    ///
    /// Precision, device and dropout are left out, so a checkpoint loads into
    /// any model with the same architecture.
    pub fn config_hash(&self) -> Result<String> {
        let config = self.config();
        let key = ArchitectureKey {
            attention: config.attention.name(),
            scaler: config.scaler,
            bias: config.bias,
        };
        let json = serde_json::to_vec(&key)
            .map_err(|e| EmotionCoreError::Serialization(format!("Failed to hash config: {}", e)))?;
        Ok(format!("{:x}", Sha256::digest(&json)))
    }

    /// Save learned parameters to a safetensors file
    ///
    /// # Example
    ///
    /// ```ignore
    /// model.save("models/emotion_model.safetensors")?;
    ///
    /// let mut loaded = EmotionModel::new(config)?;
    /// loaded.load("models/emotion_model.safetensors")?;
    /// ```
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let tensors: HashMap<String, candle_core::Tensor> = self
            .named_vars()
            .into_iter()
            .map(|(name, var)| (name, var.as_tensor().clone()))
            .collect();

        candle_core::safetensors::save(&tensors, path.as_ref())
            .map_err(|e| EmotionCoreError::Serialization(format!("Failed to save: {}", e)))?;

        info!(path = %path.as_ref().display(), params = tensors.len(), "💾 Saved emotion model");
        Ok(())
    }

    /// Load learned parameters from a safetensors file
    ///
    /// The checkpoint must hold exactly this model's parameter names, each
    /// with the same shape; tensors are converted to this model's precision.
    /// When a `.meta.json` sidecar is present its config hash must match
    /// [`config_hash`](Self::config_hash). Nothing is written to the model
    /// unless every check passes.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tensors = candle_core::safetensors::load(path, self.device())
            .map_err(|e| EmotionCoreError::Serialization(format!("Failed to deserialize: {}", e)))?;

        if path.with_extension("meta.json").exists() {
            let metadata = Self::load_metadata(path)?;
            let expected = self.config_hash()?;
            if metadata.config_hash != expected {
                return Err(EmotionCoreError::Serialization(format!(
                    "Checkpoint config hash {} does not match model config hash {}",
                    metadata.config_hash, expected
                )));
            }
        }

        let named = self.named_vars();

        let unexpected: Vec<&String> = tensors
            .keys()
            .filter(|name| !named.iter().any(|(n, _)| n == *name))
            .collect();
        if !unexpected.is_empty() {
            return Err(EmotionCoreError::Serialization(format!(
                "Unexpected parameters {:?} for {} attention",
                unexpected,
                self.attention_kind()
            )));
        }

        let mut staged = Vec::with_capacity(named.len());
        for (name, var) in &named {
            let loaded = tensors.get(name).ok_or_else(|| {
                EmotionCoreError::Serialization(format!("Missing parameter '{}'", name))
            })?;

            if loaded.dims() != var.as_tensor().dims() {
                return Err(EmotionCoreError::Serialization(format!(
                    "Parameter '{}' has shape {:?}, expected {:?}",
                    name,
                    loaded.dims(),
                    var.as_tensor().dims()
                )));
            }

            staged.push((var, loaded.to_dtype(self.dtype())?));
        }

        for (var, tensor) in staged {
            var.set(&tensor)
                .map_err(|e| EmotionCoreError::Tensor(format!("Failed to set var: {}", e)))?;
        }

        info!(path = %path.display(), "📂 Loaded emotion model");
        Ok(())
    }

    /// Save with a `.meta.json` sidecar
    pub fn save_with_metadata(&self, path: impl AsRef<Path>, metadata: &CheckpointMetadata) -> Result<()> {
        self.save(path.as_ref())?;

        let meta_path = path.as_ref().with_extension("meta.json");
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| EmotionCoreError::Serialization(format!("Failed to encode metadata: {}", e)))?;
        std::fs::write(&meta_path, json)?;
        Ok(())
    }

    /// Read the sidecar written by [`save_with_metadata`](Self::save_with_metadata).
    pub fn load_metadata(path: impl AsRef<Path>) -> Result<CheckpointMetadata> {
        let meta_path = path.as_ref().with_extension("meta.json");
        let json = std::fs::read_to_string(&meta_path).map_err(|e| {
            EmotionCoreError::Serialization(format!(
                "Failed to read metadata file '{}': {}",
                meta_path.display(),
                e
            ))
        })?;
        serde_json::from_str(&json)
            .map_err(|e| EmotionCoreError::Serialization(format!("Failed to parse metadata: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attention::AttentionKind;
    use crate::config::EmotionModelConfig;
    use crate::emotion::{Emotion, EmotionVector};

    fn config(kind: AttentionKind) -> EmotionModelConfig {
        EmotionModelConfig::default().with_attention(kind)
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emotion_model.safetensors");

        let model = EmotionModel::new(config(AttentionKind::Additive)).unwrap();
        model.save(&path).unwrap();

        let mut loaded = EmotionModel::new(config(AttentionKind::Additive)).unwrap();
        loaded.load(&path).unwrap();

        let rep = EmotionVector::one_hot(Emotion::Anger);
        let turn = EmotionVector::new([0.1, 0.4, 0.1, 0.1, 0.1, 0.1, 0.1]);
        let a = model.step(&rep, &turn).unwrap();
        let b = loaded.step(&rep, &turn).unwrap();
        for (x, y) in a.0.iter().zip(b.0.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_rejects_mismatched_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dot.safetensors");

        EmotionModel::new(config(AttentionKind::DotProduct))
            .unwrap()
            .save(&path)
            .unwrap();

        let mut dual = EmotionModel::new(config(AttentionKind::DualLinear)).unwrap();
        let err = dual.load(&path).unwrap_err();
        assert!(err.to_string().contains("attention.w_q"));
    }

    #[test]
    fn test_metadata_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");

        let model = EmotionModel::new(config(AttentionKind::DualLinear)).unwrap();
        let meta = CheckpointMetadata::new("emotion_model", "1.0.0", &model).unwrap();
        model.save_with_metadata(&path, &meta).unwrap();

        let read = EmotionModel::load_metadata(&path).unwrap();
        assert_eq!(read, meta);
        assert_eq!(read.param_count, model.param_count());
        assert_eq!(read.config_hash.len(), 64);
    }

    #[test]
    fn test_config_hash_tracks_config() {
        let a = EmotionModel::new(config(AttentionKind::DualLinear)).unwrap();
        let b = EmotionModel::new(config(AttentionKind::DualLinear)).unwrap();
        let c = EmotionModel::new(config(AttentionKind::Additive)).unwrap();
        assert_eq!(a.config_hash().unwrap(), b.config_hash().unwrap());
        assert_ne!(a.config_hash().unwrap(), c.config_hash().unwrap());
    }

    #[test]
    fn test_missing_metadata_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EmotionModel::load_metadata(dir.path().join("none.safetensors")).is_err());
    }

    fn weights(model: &EmotionModel) -> Vec<(String, Vec<f32>)> {
        model
            .named_vars()
            .into_iter()
            .map(|(name, var)| {
                let values = var.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
                (name, values)
            })
            .collect()
    }

    #[test]
    fn test_load_rejects_extra_parameters_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("additive.safetensors");
        EmotionModel::new(config(AttentionKind::Additive))
            .unwrap()
            .save(&path)
            .unwrap();

        let mut dual = EmotionModel::new(config(AttentionKind::DualLinear)).unwrap();
        let before = weights(&dual);
        let err = dual.load(&path).unwrap_err();
        assert!(err.to_string().contains("attention.w_v"));
        assert_eq!(weights(&dual), before);
    }

    #[test]
    fn test_failed_load_leaves_model_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dual.safetensors");
        EmotionModel::new(config(AttentionKind::DualLinear))
            .unwrap()
            .save(&path)
            .unwrap();

        // shares w_q, w_k and the projection but lacks w_v
        let mut additive = EmotionModel::new(config(AttentionKind::Additive)).unwrap();
        let before = weights(&additive);
        let err = additive.load(&path).unwrap_err();
        assert!(err.to_string().contains("attention.w_v"));
        assert_eq!(weights(&additive), before);
    }

    #[test]
    fn test_load_checks_sidecar_config_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dot.safetensors");
        let dot = EmotionModel::new(config(AttentionKind::DotProduct)).unwrap();
        let meta = CheckpointMetadata::new("emotion_model", "1.0.0", &dot).unwrap();
        dot.save_with_metadata(&path, &meta).unwrap();

        // same parameter names, different scorer
        let mut scaled = EmotionModel::new(config(AttentionKind::ScaledDotProduct)).unwrap();
        let before = weights(&scaled);
        assert!(scaled.load(&path).is_err());
        assert_eq!(weights(&scaled), before);

        let mut same = EmotionModel::new(config(AttentionKind::DotProduct)).unwrap();
        same.load(&path).unwrap();
        assert_eq!(weights(&same), weights(&dot));
    }

    #[test]
    fn test_load_converts_precision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let model = EmotionModel::new(config(AttentionKind::DualLinear)).unwrap();
        let meta = CheckpointMetadata::new("emotion_model", "1.0.0", &model).unwrap();
        model.save_with_metadata(&path, &meta).unwrap();

        let mut double = EmotionModel::new(
            config(AttentionKind::DualLinear).with_precision(crate::config::Precision::F64),
        )
        .unwrap();
        double.load(&path).unwrap();
        assert_eq!(
            double.named_vars()[0].1.as_tensor().dtype(),
            candle_core::DType::F64
        );
    }

    #[test]
    fn test_large_projection_saturates_to_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saturating.safetensors");
        let device = candle_core::Device::Cpu;

        // even rows push to +50, odd rows to -50; softmax weights sum to 1
        let rows: Vec<f32> = (0..7)
            .flat_map(|i| std::iter::repeat(if i % 2 == 0 { 50.0f32 } else { -50.0 }).take(7))
            .collect();
        let tensors = HashMap::from([
            (
                "projection.weight".to_string(),
                candle_core::Tensor::from_vec(rows, (7, 7), &device).unwrap(),
            ),
            (
                "projection.bias".to_string(),
                candle_core::Tensor::zeros(7, candle_core::DType::F32, &device).unwrap(),
            ),
        ]);
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let mut model = EmotionModel::new(config(AttentionKind::DotProduct)).unwrap();
        model.load(&path).unwrap();

        let out = model
            .step(
                &EmotionVector::one_hot(Emotion::Fear),
                &EmotionVector::new([0.3, 0.1, 0.1, 0.2, 0.1, 0.1, 0.1]),
            )
            .unwrap();
        assert_eq!(out.0, [1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0]);
        assert!(out.is_bounded());
    }
}
