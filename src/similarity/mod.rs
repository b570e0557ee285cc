//! Similarity Analyser
//!
//! Ranks candidate representations against an ideal one.
//!
//! ```text
//! cos_i   = cos(candidate_i, ideal)
//! ratio_i = ‖candidate_i‖ / ‖ideal‖
//! sim_i   = clamp(cos_i · ratio_i, 0, 1)
//! ```
//!
//! The length ratio penalises candidates that point the right way with the
//! wrong magnitude; the clamp brings overshooting ratios back into `[0, 1]`.
//!
//! ## Threshold is a ceiling
//!
//! [`SimilarityAnalyser::max_similarity`] picks the best score that does
//! **not exceed** the threshold (`sim ≤ threshold`). It is an inclusive upper
//! bound, not a minimum bar.
//!
//! ## Caching
//!
//! [`compare`](SimilarityAnalyser::compare) caches its inputs and scores;
//! every query reads that cache. Changing the threshold does not recompute
//! anything by itself: call [`recompute`](SimilarityAnalyser::recompute)
//! afterwards to refresh the cache from the last inputs.
//!
//! Scores are computed in the configured precision (f16 and bf16 widen to
//! f32) but cached as `f32`. The exact-match lookups
//! ([`indices_with_similarity`](SimilarityAnalyser::indices_with_similarity)
//! and friends) compare those `f32` values, so f64 scores that round to
//! the same `f32` are treated as equal.

use crate::config::{validate_threshold, SimilarityConfig};
use crate::emotion::{stack_vectors, EmotionVector, EMOTION_DIM};
use crate::primitives::{cosine_similarity_rows, detached_on, ensure_shape, hard_clamp, row_norms};
use crate::{EmotionCoreError, Result};
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Best-matching representations and their shared score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    /// Every cached candidate whose score equals `similarity`
    pub representations: Vec<EmotionVector>,
    /// Maximum score under the threshold ceiling, 0 when none qualifies
    pub similarity: f32,
}

/// Inputs and scores of the last comparison
#[derive(Debug, Clone)]
struct Comparison {
    /// `[N, 7]`
    representations: Tensor,
    /// `[7]`
    ideal: Tensor,
    /// One score per candidate, read back to host
    similarity: Vec<f32>,
}

/// Compares candidate representations with an ideal representation.
///
/// Single-threaded by contract: the cache is per instance and mutated by
/// [`compare`](Self::compare) and [`recompute`](Self::recompute).
#[derive(Debug)]
pub struct SimilarityAnalyser {
    threshold: f32,
    fallback: Option<f32>,
    dtype: DType,
    device: Device,
    cached: Option<Comparison>,
}

impl SimilarityAnalyser {
    /// Validate the threshold and resolve the device.
    ///
    /// An out-of-range threshold uses `fallback_threshold` if configured,
    /// otherwise fails with [`EmotionCoreError::OutOfRange`].
    pub fn new(config: SimilarityConfig) -> Result<Self> {
        let threshold = validate_threshold(config.threshold, config.fallback_threshold)?;
        let device = config.device.resolve()?;

        info!(threshold, precision = %config.precision, device = %config.device, "Similarity analyser ready");

        Ok(Self {
            threshold,
            fallback: config.fallback_threshold,
            dtype: config.precision.dtype(),
            device,
            cached: None,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Validate and store a new threshold.
    ///
    /// Cached scores are left as they are; call [`recompute`](Self::recompute)
    /// to refresh them.
    pub fn set_threshold(&mut self, threshold: f32) -> Result<()> {
        self.threshold = validate_threshold(threshold, self.fallback)?;
        Ok(())
    }

    /// Score `candidates` against `ideal` and cache the result.
    ///
    /// Returns one score in `[0, 1]` per candidate. A zero-length ideal
    /// vector is rejected.
    pub fn compare(&mut self, candidates: &[EmotionVector], ideal: &EmotionVector) -> Result<Vec<f32>> {
        let representations = stack_vectors(candidates, self.dtype, &self.device)?;
        let ideal = ideal.to_tensor(self.dtype, &self.device)?;
        self.compare_tensors(&representations, &ideal)
    }

    /// [`compare`](Self::compare) on tensors: `candidates: [N, 7]`, `ideal: [7]`.
    ///
    /// Inputs are detached and cast to the configured precision and device.
    pub fn compare_tensors(&mut self, candidates: &Tensor, ideal: &Tensor) -> Result<Vec<f32>> {
        let rows = candidates.dims().first().copied().unwrap_or(0);
        ensure_shape(candidates, &[rows, EMOTION_DIM])?;
        ensure_shape(ideal, &[EMOTION_DIM])?;

        let representations = detached_on(candidates, self.dtype, &self.device)?;
        let ideal = detached_on(ideal, self.dtype, &self.device)?;

        let similarity = Self::score(&representations, &ideal)?;
        debug!(candidates = rows, "compared representations");

        self.cached = Some(Comparison {
            representations,
            ideal,
            similarity: similarity.clone(),
        });
        Ok(similarity)
    }

    /// Re-run the last comparison, e.g. after [`set_threshold`](Self::set_threshold).
    pub fn recompute(&mut self) -> Result<Vec<f32>> {
        let (representations, ideal) = {
            let cached = self.cached.as_ref().ok_or(EmotionCoreError::NoComparison)?;
            (cached.representations.clone(), cached.ideal.clone())
        };
        self.compare_tensors(&representations, &ideal)
    }

    /// Half precisions are widened to f32 first: the norm floor underflows
    /// to zero in f16.
    fn score(representations: &Tensor, ideal: &Tensor) -> Result<Vec<f32>> {
        let compute = match representations.dtype() {
            DType::F64 => DType::F64,
            _ => DType::F32,
        };
        let representations = &representations.to_dtype(compute)?;
        let ideal = &ideal.to_dtype(compute)?;

        let ideal_norm = ideal
            .sqr()?
            .sum_all()?
            .sqrt()?
            .to_dtype(DType::F32)?
            .to_scalar::<f32>()?;
        if ideal_norm <= 0.0 || !ideal_norm.is_finite() {
            return Err(EmotionCoreError::OutOfRange {
                name: "ideal representation norm".into(),
                value: ideal_norm as f64,
                bound: "(0, inf)",
            });
        }

        let cosine = cosine_similarity_rows(representations, ideal)?;
        let ratio = row_norms(representations)?.affine(1.0 / ideal_norm as f64, 0.0)?;

        let similarity = hard_clamp(&cosine.mul(&ratio)?, 0.0, 1.0)?;
        Ok(similarity.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    fn cached(&self) -> Result<&Comparison> {
        self.cached.as_ref().ok_or(EmotionCoreError::NoComparison)
    }

    /// Scores from the last comparison
    pub fn similarities(&self) -> Result<&[f32]> {
        Ok(&self.cached()?.similarity)
    }

    /// Highest cached score that is `≤ threshold`, or 0 if none qualifies.
    pub fn max_similarity(&self) -> Result<f32> {
        let threshold = self.threshold;
        Ok(self
            .cached()?
            .similarity
            .iter()
            .copied()
            .filter(|s| *s <= threshold)
            .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))))
            .unwrap_or(0.0))
    }

    /// Indices of every cached candidate scoring exactly `similarity`.
    pub fn indices_with_similarity(&self, similarity: f32) -> Result<Vec<usize>> {
        Ok(self
            .cached()?
            .similarity
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == similarity)
            .map(|(i, _)| i)
            .collect())
    }

    /// Every cached candidate scoring exactly `similarity`, duplicates kept.
    pub fn representations_with_similarity(&self, similarity: f32) -> Result<Vec<EmotionVector>> {
        let indices = self.indices_with_similarity(similarity)?;
        let rows = EmotionVector::rows_from_tensor(&self.cached()?.representations)?;
        Ok(indices.into_iter().map(|i| rows[i]).collect())
    }

    /// Maximum score under the ceiling together with the candidates that
    /// reach it.
    pub fn most_similar_representation(&self) -> Result<SimilarityMatch> {
        let similarity = self.max_similarity()?;
        Ok(SimilarityMatch {
            representations: self.representations_with_similarity(similarity)?,
            similarity,
        })
    }

    /// Positions of the candidates returned by
    /// [`most_similar_representation`](Self::most_similar_representation).
    pub fn most_similar_representation_index(&self) -> Result<Vec<usize>> {
        self.indices_with_similarity(self.max_similarity()?)
    }
}
