//! Fully connected (linear) layer in the graph paradigm.

use crate::nn::module::{param_name, Module};
use crate::params::{kaiming_uniform, ParameterStore};
use crate::tensor::{GraphContext, Tensor};
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;

/// Fully connected (linear) layer.
///
/// The layer holds no data. It owns symbolic handles to its weights
/// (`[in_features, out_features]`) and bias (`[1, out_features]`), which are
/// `Parameter` nodes of the ASG.
///
/// `forward` records `y = xW + b`. Inputs of any rank ≥ 2 are accepted; the
/// product is taken over the last axis.
#[derive(Debug, Clone)]
pub struct Linear {
    pub weights: Tensor,
    pub bias: Tensor,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Creates a linear layer, registering `"{name}.weights"` and
    /// `"{name}.bias"` in the graph.
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        in_features: usize,
        out_features: usize,
        name: &str,
    ) -> Self {
        let weights = Tensor::new_parameter(context, &format!("{}.weights", name));
        let bias = Tensor::new_parameter(context, &format!("{}.bias", name));

        Self {
            weights,
            bias,
            in_features,
            out_features,
        }
    }
}

impl Module for Linear {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        let dot_product = inputs.dot(&self.weights);
        &dot_product + &self.bias
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weights.clone(), self.bias.clone()]
    }

    /// Both tensors are drawn from U(±1/sqrt(in_features)).
    fn reset_parameters(&self, store: &mut ParameterStore, rng: &mut StdRng) {
        store.insert(
            param_name(&self.weights),
            kaiming_uniform(&[self.in_features, self.out_features], self.in_features, rng),
        );
        store.insert(
            param_name(&self.bias),
            kaiming_uniform(&[1, self.out_features], self.in_features, rng),
        );
    }
}
