//! Core Tensor Operations
//!
//! Device selection plus the handful of batched vector operations the
//! emotion model and the similarity analyser share.
//!
//! ## Device selection
//!
//! [`best_device`] prefers Metal, then CUDA, then CPU. Set
//! `AN_EMOTION_NO_GPU=1` to force CPU regardless of compiled features:
//!
//! ```bash
//! export AN_EMOTION_NO_GPU=1
//! ```

use crate::{EmotionCoreError, Result};
use candle_core::{DType, Device, Tensor, D};
use tracing::info;

/// Norm floor used by cosine similarity, matching the usual `1e-8` epsilon.
pub const NORM_EPS: f64 = 1e-8;

// ============================================================================
// Environment-controlled Device Selection
// ============================================================================

/// Check if GPU is disabled via environment variable.
///
/// Set `AN_EMOTION_NO_GPU=1` to force CPU-only mode.
pub fn gpu_disabled() -> bool {
    std::env::var("AN_EMOTION_NO_GPU")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Get the best available device for tensor operations
///
/// Priority:
/// 1. Check `AN_EMOTION_NO_GPU` env var (forces CPU if set)
/// 2. Metal (Apple Silicon)
/// 3. CUDA (NVIDIA GPUs)
/// 4. CPU (fallback)
pub fn best_device() -> Device {
    if gpu_disabled() {
        info!("💻 Using CPU device (AN_EMOTION_NO_GPU set)");
        return Device::Cpu;
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("🍎 Using Metal device (Apple Silicon)");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("🟢 Using CUDA device (NVIDIA GPU)");
            return device;
        }
    }

    info!("💻 Using CPU device");
    Device::Cpu
}

/// Force CPU device, ignoring GPU availability.
pub fn cpu_device() -> Device {
    Device::Cpu
}

/// Check if Metal is available (respects AN_EMOTION_NO_GPU)
#[cfg(feature = "metal")]
pub fn metal_available() -> bool {
    !gpu_disabled() && Device::new_metal(0).is_ok()
}

/// Check if Metal is available (always false when `metal` feature is not enabled)
#[cfg(not(feature = "metal"))]
pub fn metal_available() -> bool {
    false
}

/// Check if CUDA is available (respects AN_EMOTION_NO_GPU)
#[cfg(feature = "cuda")]
pub fn cuda_available() -> bool {
    !gpu_disabled() && Device::new_cuda(0).is_ok()
}

/// Check if CUDA is available (always false when `cuda` feature is not enabled)
#[cfg(not(feature = "cuda"))]
pub fn cuda_available() -> bool {
    false
}

/// Check if any GPU is available and enabled
pub fn gpu_available() -> bool {
    !gpu_disabled() && (metal_available() || cuda_available())
}

// ============================================================================
// Shape helpers
// ============================================================================

/// Fail with [`EmotionCoreError::DimensionMismatch`] unless `tensor` has
/// exactly the expected shape.
pub fn ensure_shape(tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() != expected {
        return Err(EmotionCoreError::DimensionMismatch {
            expected: expected.to_vec(),
            actual: tensor.dims().to_vec(),
        });
    }
    Ok(())
}

/// Move a tensor to the working precision and device, detached from any
/// gradient graph.
pub fn detached_on(tensor: &Tensor, dtype: DType, device: &Device) -> Result<Tensor> {
    Ok(tensor.detach().to_dtype(dtype)?.to_device(device)?)
}

/// Diagonal matrix from a 1D vector: `out[i][i] = v[i]`, zero elsewhere.
///
/// Built as `eye(n) * v` so gradients still flow back into `v`.
pub fn diag(vector: &Tensor) -> Result<Tensor> {
    let dims = vector.dims();
    if dims.len() != 1 {
        return Err(EmotionCoreError::Tensor(format!(
            "diag expects a 1D tensor, got shape {:?}",
            dims
        )));
    }
    let n = dims[0];
    let eye = Tensor::eye(n, vector.dtype(), vector.device())?;
    eye.broadcast_mul(&vector.unsqueeze(1)?)
        .map_err(|e| EmotionCoreError::Tensor(format!("diag mul failed: {}", e)))
}

/// Euclidean norm of every row of a `[N, D]` matrix → `[N]`.
pub fn row_norms(matrix: &Tensor) -> Result<Tensor> {
    matrix
        .sqr()?
        .sum(D::Minus1)?
        .sqrt()
        .map_err(|e| EmotionCoreError::Tensor(format!("row norm failed: {}", e)))
}

/// Cosine similarity between each row of `rows` (`[N, D]`) and `target` (`[D]`).
///
/// Each norm is floored at [`NORM_EPS`] so zero rows score 0 instead of NaN.
/// Returns `[N]` values in [-1, 1].
pub fn cosine_similarity_rows(rows: &Tensor, target: &Tensor) -> Result<Tensor> {
    let dot = rows
        .broadcast_mul(target)?
        .sum(D::Minus1)
        .map_err(|e| EmotionCoreError::Tensor(format!("Dot product failed: {}", e)))?;

    let rows_norm = row_norms(rows)?.clamp(NORM_EPS, f64::MAX)?;
    let target_norm = target.sqr()?.sum_all()?.sqrt()?.clamp(NORM_EPS, f64::MAX)?;

    let denom = rows_norm.broadcast_mul(&target_norm)?;
    dot.div(&denom)
        .map_err(|e| EmotionCoreError::Tensor(format!("cosine div failed: {}", e)))
}

/// Scalar cosine similarity between two 1D tensors.
pub fn cosine_similarity(a: &Tensor, b: &Tensor) -> Result<f32> {
    let sim = cosine_similarity_rows(&a.unsqueeze(0)?, b)?;
    Ok(sim.to_dtype(DType::F32)?.to_vec1::<f32>()?[0])
}
