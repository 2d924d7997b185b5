pub mod centroid;
pub mod dense;
pub mod sign_vector;
mod utils;

pub use centroid::{perform_centroid_decomposition, CentroidDecomposition, CentroidDecompositionBuilder};
pub use sign_vector::SignVectorStrategy;
pub use utils::{SignVectorOps, DEFAULT_EPSILON};
