//! Tensor Primitives
//!
//! Core tensor operations, activations and learned layers shared by the
//! attention scorers, the representation update model and the similarity
//! analyser.
//!
//! ## Submodules
//!
//! - [`tensor_ops`]: Device selection, diagonalisation, cosine similarity
//! - [`activations`]: Softmax and hard clamping
//! - [`layers`]: Fixed-size linear projections and dropout

mod tensor_ops;
mod activations;
mod layers;

pub use tensor_ops::*;
pub use activations::*;
pub use layers::*;
