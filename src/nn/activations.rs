//! Activation layers for the graph architecture.

use crate::nn::module::Module;
use crate::tensor::Tensor;

/// GELU activation in its exact form, `0.5 * x * (1 + erf(x / sqrt(2)))`.
///
/// Has no trainable parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct GELU;

impl GELU {
    pub fn new() -> Self {
        GELU
    }
}

impl Module for GELU {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.gelu()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::module::test_util::run_graph;
    use crate::params::ParameterStore;
    use crate::runtime::cpu_backend::CpuBackend;
    use crate::tensor::GraphContext;
    use ndarray::arr1;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_gelu_values() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let y = GELU::new().forward(&x);

        let data = arr1(&[0.0, 1.0, -1.0, 6.0, -3.0]).into_dyn();
        let out = run_graph(&context, &[&y], &[("x", data)], &ParameterStore::new(), &CpuBackend::new());
        assert_eq!(out[0][[0]], 0.0);
        assert!((out[0][[1]] - 0.841_344_7).abs() < 1e-5);
        assert!((out[0][[2]] + 0.158_655_3).abs() < 1e-5);
        assert!((out[0][[3]] - 6.0).abs() < 1e-5);
        // The tanh approximation gives -0.003637 here.
        assert!((out[0][[4]] + 0.004_049_6).abs() < 1e-5);
    }
}
