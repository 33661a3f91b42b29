use crate::params::{ones, zeros, ParameterStore};
use crate::tensor::{GraphContext, Tensor};
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;

use super::module::{param_name, Module};

/// Layer normalization over the last axis.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub gamma: Tensor,
    pub beta: Tensor,
    pub normalized_dim: usize,
    eps: f32,
}

impl LayerNorm {
    pub fn new(context: &Rc<RefCell<GraphContext>>, normalized_dim: usize, name: &str) -> Self {
        LayerNorm {
            gamma: Tensor::new_parameter(context, &format!("{}_gamma", name)),
            beta: Tensor::new_parameter(context, &format!("{}_beta", name)),
            normalized_dim,
            eps: 1e-5,
        }
    }

    pub fn forward(&self, x: &Tensor) -> Tensor {
        // Biased variance, as in the usual layer norm.
        let mean = x.mean();
        let centered = x - &mean;
        let sq = &centered * &centered;
        let var = sq.mean();
        let eps_literal = Tensor::scalar(&x.context, self.eps);
        let var_plus_eps = &var + &eps_literal;
        let std = var_plus_eps.sqrt();
        let norm = &centered / &std;
        let scaled = &self.gamma * &norm;
        scaled + &self.beta
    }
}

impl Module for LayerNorm {
    fn forward(&self, input: &Tensor) -> Tensor {
        self.forward(input)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.gamma.clone(), self.beta.clone()]
    }

    fn reset_parameters(&self, store: &mut ParameterStore, _rng: &mut StdRng) {
        store.insert(param_name(&self.gamma), ones(&[self.normalized_dim]));
        store.insert(param_name(&self.beta), zeros(&[self.normalized_dim]));
    }
}
