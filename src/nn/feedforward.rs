//! Position-wise feed-forward network of a transformer layer.

use crate::nn::{Linear, Module, GELU};
use crate::params::ParameterStore;
use crate::tensor::{GraphContext, Tensor};
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;

/// `FFN(x) = GELU(xW₁ + b₁)W₂ + b₂`, applied to each position independently.
pub struct FeedForward {
    /// Expands `hidden_dim -> ffn_dim`.
    layer1: Linear,
    gelu: GELU,
    /// Projects back `ffn_dim -> hidden_dim`.
    layer2: Linear,
}

impl FeedForward {
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        hidden_dim: usize,
        ffn_dim: usize,
        name: &str,
    ) -> Self {
        Self {
            layer1: Linear::new(context, hidden_dim, ffn_dim, &format!("{}.layer1", name)),
            gelu: GELU::new(),
            layer2: Linear::new(context, ffn_dim, hidden_dim, &format!("{}.layer2", name)),
        }
    }
}

impl Module for FeedForward {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        let x = self.layer1.forward(inputs);
        let x = self.gelu.forward(&x);
        self.layer2.forward(&x)
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = Vec::new();
        params.extend(self.layer1.parameters());
        params.extend(self.layer2.parameters());
        params
    }

    fn reset_parameters(&self, store: &mut ParameterStore, rng: &mut StdRng) {
        self.layer1.reset_parameters(store, rng);
        self.layer2.reset_parameters(store, rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::module::test_util::run_graph;
    use crate::runtime::cpu_backend::CpuBackend;
    use ndarray::Array3;
    use rand::SeedableRng;

    #[test]
    fn test_shape_and_reset() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let ffn = FeedForward::new(&context, 8, 32, "ffn");
        let x = Tensor::new_input(&context, "x");
        let y = ffn.forward(&x);

        let mut store = ParameterStore::new();
        ffn.reset_parameters(&mut store, &mut StdRng::seed_from_u64(2));
        assert_eq!(store.names(), vec!["ffn.layer1.bias", "ffn.layer1.weights", "ffn.layer2.bias", "ffn.layer2.weights"]);
        assert_eq!(store.get("ffn.layer1.weights").unwrap().shape(), &[8, 32]);
        assert_eq!(store.get("ffn.layer2.weights").unwrap().shape(), &[32, 8]);

        let data = Array3::from_elem((2, 3, 8), 0.5f32).into_dyn();
        let out = run_graph(&context, &[&y], &[("x", data)], &store, &CpuBackend::new());
        assert_eq!(out[0].shape(), &[2, 3, 8]);
    }
}
