//! # an-emotion-model
//!
//! Attention-based emotion representation evolution for emotion-aware
//! dialogue agents.
//!
//! ## Overview
//!
//! A bot carries an internal emotional state: a 7-dimensional
//! *representation vector* bounded to [-1, 1], indexed by the fixed
//! [`Emotion`](emotion::Emotion) label set. Every dialogue turn brings an
//! *emotion composition* from a sentiment classifier, and the representation
//! is replaced by a new one computed from both.
//!
//! Core capabilities:
//!
//! - **Attention**: pluggable scorers (dot product, scaled dot product,
//!   additive, dual linear) mixing a composition with the current state
//! - **Model**: diagonal keys → attention → row sum → softmax → learned
//!   projection → clamp, iterated turn by turn into a trajectory
//! - **Similarity**: rank candidate representations against an ideal one
//!   under an inclusive similarity ceiling
//! - **Training / Evaluation**: cross-entropy training with candle-nn
//!   optimizers, accuracy and F1 reporting
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use an_emotion_model::prelude::*;
//!
//! let model = EmotionModel::new(EmotionModelConfig {
//!     attention: AttentionKind::DualLinear,
//!     ..Default::default()
//! })?;
//!
//! let seed = vec![EmotionVector::one_hot(Emotion::Neutral)];
//! let turns = vec![sentiment_composition(&classifier_scores)?];
//! let trajectory = model.evolve_vectors(seed, &turns)?;
//!
//! let mut analyser = SimilarityAnalyser::new(SimilarityConfig::default())?;
//! analyser.compare(&trajectory, &ideal)?;
//! let best = analyser.most_similar_representation()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `metal`: Apple Metal GPU acceleration
//! - `cuda`: NVIDIA CUDA GPU acceleration

pub mod primitives;
pub mod emotion;
pub mod attention;
pub mod model;
pub mod similarity;
pub mod training;
pub mod evaluation;
pub mod config;

// Re-export candle types for convenience
pub use candle_core::{DType, Device, Tensor, Var};

/// Error types for emotion model operations
#[derive(Debug, thiserror::Error)]
pub enum EmotionCoreError {
    #[error("Tensor operation failed: {0}")]
    Tensor(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{name} = {value} is out of range, expected {bound}")]
    OutOfRange {
        name: String,
        value: f64,
        bound: &'static str,
    },

    #[error("Dimension mismatch: expected shape {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Trajectory must contain at least one representation")]
    EmptyTrajectory,

    #[error("No cached comparison: call compare() before querying or recomputing")]
    NoComparison,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for emotion model operations
pub type Result<T> = std::result::Result<T, EmotionCoreError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{EmotionCoreError, Result};

    // Primitives
    pub use crate::primitives::{
        best_device, cpu_device, cosine_similarity, gpu_available, gpu_disabled,
        ForwardMode,
    };

    // Emotion label set
    pub use crate::emotion::{
        dummy_representation, ideal_representation, sentiment_composition,
        Emotion, EmotionVector, EMOTION_DIM,
    };

    // Attention
    pub use crate::attention::{AttentionKind, AttentionScorer};

    // Model
    pub use crate::model::{CheckpointMetadata, EmotionModel};

    // Similarity
    pub use crate::similarity::{SimilarityAnalyser, SimilarityMatch};

    // Training & evaluation
    pub use crate::training::{
        EmotionTrainer, MetricsTracker, Optimizer, TrainingMetrics, TransitionSample,
        safe_optimizer_step, compute_grad_norm, check_gradients_health,
    };
    pub use crate::evaluation::{EvaluationReport, F1Average};

    // Configuration
    pub use crate::config::{
        DeviceSpec, EmotionModelConfig, LearningConfig, PipelineConfig, Precision,
        SimilarityConfig,
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let device = best_device();
        assert!(matches!(device, Device::Cpu) || matches!(device, Device::Metal(_)) || matches!(device, Device::Cuda(_)));
        assert_eq!(Emotion::ALL.len(), EMOTION_DIM);
    }

    #[test]
    fn test_out_of_range_message_names_value_and_bound() {
        let err = crate::EmotionCoreError::OutOfRange {
            name: "threshold".into(),
            value: 1.5,
            bound: "(0, 1]",
        };
        let msg = err.to_string();
        assert!(msg.contains("1.5"));
        assert!(msg.contains("(0, 1]"));
    }
}
