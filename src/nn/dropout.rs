//! Dropout layer for regularization.

use crate::nn::Module;
use crate::tensor::Tensor;

/// Inverted dropout.
///
/// Records a `Dropout` node. Whether elements are actually zeroed (and the
/// survivors scaled by `1/(1-p)`) is decided by the backend that runs the
/// graph: an inference backend passes values through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    /// Drop probability in `[0, 1)`.
    pub p: f32,
}

impl Dropout {
    /// # Panics
    /// Panics if `p` is outside `[0, 1)`.
    pub fn new(p: f32) -> Self {
        assert!(
            (0.0..1.0).contains(&p),
            "Dropout probability must be in [0, 1), got {}",
            p
        );
        Self { p }
    }
}

impl Module for Dropout {
    fn forward(&self, x: &Tensor) -> Tensor {
        x.dropout(self.p)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}
