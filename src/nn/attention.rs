//! Multi-head attention with an optional additive bias on the scores.
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use graphormer::nn::{MultiHeadAttention, Module};
//! use graphormer::tensor::{GraphContext, Tensor};
//!
//! let context = Rc::new(RefCell::new(GraphContext::new()));
//! let mha = MultiHeadAttention::new(&context, 512, 0.1, 8, "mha");
//!
//! let x = Tensor::new_input(&context, "x"); // [batch, seq_len, 512]
//! let bias = Tensor::new_input(&context, "bias"); // [batch, 8, seq_len, seq_len]
//! let attended = mha.forward_with_bias(&x, &x, &x, Some(&bias));
//! ```

use crate::nn::{Dropout, Linear, Module};
use crate::params::ParameterStore;
use crate::tensor::{GraphContext, Tensor};
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;

/// Handles produced by one attention call.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `[batch, seq_q, hidden]`.
    pub output: Tensor,
    /// Attention probabilities after softmax, `[batch, heads, seq_q, seq_k]`.
    pub weights: Tensor,
}

/// Multi-head attention.
///
/// Scores are `(q * att_size^-0.5) · kᵀ + bias`, normalized over keys.
/// Attention dropout is applied to the probabilities before they weight
/// the values.
pub struct MultiHeadAttention {
    num_heads: usize,
    att_size: usize,
    hidden_dim: usize,
    linear_q: Linear,
    linear_k: Linear,
    linear_v: Linear,
    output_layer: Linear,
    att_dropout: Dropout,
    scale: f32,
    context: Rc<RefCell<GraphContext>>,
}

impl MultiHeadAttention {
    /// # Panics
    /// Panics when `hidden_dim` is not a multiple of `num_heads`.
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        hidden_dim: usize,
        attention_dropout_rate: f32,
        num_heads: usize,
        name: &str,
    ) -> Self {
        assert!(
            num_heads > 0 && hidden_dim % num_heads == 0,
            "hidden_dim ({}) must be divisible by num_heads ({}) without remainder.",
            hidden_dim,
            num_heads
        );
        let att_size = hidden_dim / num_heads;
        let scale = (att_size as f32).powf(-0.5);

        Self {
            num_heads,
            att_size,
            hidden_dim,
            linear_q: Linear::new(context, hidden_dim, hidden_dim, &format!("{}.linear_q", name)),
            linear_k: Linear::new(context, hidden_dim, hidden_dim, &format!("{}.linear_k", name)),
            linear_v: Linear::new(context, hidden_dim, hidden_dim, &format!("{}.linear_v", name)),
            output_layer: Linear::new(context, hidden_dim, hidden_dim, &format!("{}.output_layer", name)),
            att_dropout: Dropout::new(attention_dropout_rate),
            scale,
            context: Rc::clone(context),
        }
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn att_size(&self) -> usize {
        self.att_size
    }

    /// Attention over explicit query, key and value sequences.
    ///
    /// * `q`, `k`, `v` - `[batch, seq, hidden]`
    /// * `attn_bias` - optional `[batch, heads, seq_q, seq_k]`, added to the scores
    pub fn forward_with_bias(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        attn_bias: Option<&Tensor>,
    ) -> AttentionOutput {
        // [batch, seq, hidden] -> [batch, heads, seq, att_size]
        let q_heads = self.split_heads(&self.linear_q.forward(q));
        let k_heads = self.split_heads(&self.linear_k.forward(k));
        let v_heads = self.split_heads(&self.linear_v.forward(v));

        let scale = Tensor::scalar(&self.context, self.scale);
        let q_scaled = &q_heads * &scale;

        // [batch, heads, seq_q, att_size] @ [batch, heads, att_size, seq_k]
        let scores = q_scaled.dot(&k_heads.transpose(2, 3));
        let scores = match attn_bias {
            Some(bias) => &scores + bias,
            None => scores,
        };

        let weights = scores.softmax();
        let attended = self.att_dropout.forward(&weights).dot(&v_heads);

        let merged = self.combine_heads(&attended);
        let output = self.output_layer.forward(&merged).same_shape_as(q);

        AttentionOutput { output, weights }
    }

    fn split_heads(&self, x: &Tensor) -> Tensor {
        x.reshape(vec![0, 0, self.num_heads as i64, self.att_size as i64])
            .transpose(1, 2)
    }

    fn combine_heads(&self, x: &Tensor) -> Tensor {
        x.transpose(1, 2).reshape(vec![0, 0, self.hidden_dim as i64])
    }
}

impl Module for MultiHeadAttention {
    /// Unbiased self-attention.
    fn forward(&self, inputs: &Tensor) -> Tensor {
        self.forward_with_bias(inputs, inputs, inputs, None).output
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = Vec::new();
        params.extend(self.linear_q.parameters());
        params.extend(self.linear_k.parameters());
        params.extend(self.linear_v.parameters());
        params.extend(self.output_layer.parameters());
        params
    }

    fn reset_parameters(&self, store: &mut ParameterStore, rng: &mut StdRng) {
        self.linear_q.reset_parameters(store, rng);
        self.linear_k.reset_parameters(store, rng);
        self.linear_v.reset_parameters(store, rng);
        self.output_layer.reset_parameters(store, rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::module::test_util::run_graph;
    use crate::runtime::cpu_backend::CpuBackend;
    use ndarray::{Array3, Array4, Axis};
    use rand::SeedableRng;

    #[test]
    #[should_panic(expected = "must be divisible by num_heads")]
    fn test_heads_must_divide_hidden() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        MultiHeadAttention::new(&context, 10, 0.0, 3, "mha");
    }

    #[test]
    fn test_output_shape_matches_query() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let mha = MultiHeadAttention::new(&context, 8, 0.0, 2, "mha");
        let x = Tensor::new_input(&context, "x");
        let out = mha.forward(&x);
        assert_eq!(mha.parameters().len(), 8);
        assert_eq!(mha.att_size(), 4);

        let mut store = ParameterStore::new();
        mha.reset_parameters(&mut store, &mut StdRng::seed_from_u64(5));
        let data = Array3::from_shape_fn((2, 5, 8), |(b, s, h)| (b + s * h) as f32 * 0.1).into_dyn();

        let result = run_graph(&context, &[&out], &[("x", data)], &store, &CpuBackend::new());
        assert_eq!(result[0].shape(), &[2, 5, 8]);
    }

    #[test]
    fn test_bias_masks_keys() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let mha = MultiHeadAttention::new(&context, 4, 0.0, 2, "mha");
        let x = Tensor::new_input(&context, "x");
        let bias = Tensor::new_input(&context, "bias");
        let attn = mha.forward_with_bias(&x, &x, &x, Some(&bias));

        let mut store = ParameterStore::new();
        mha.reset_parameters(&mut store, &mut StdRng::seed_from_u64(9));

        let data = Array3::from_shape_fn((1, 3, 4), |(_, s, h)| (s as f32 - h as f32) * 0.3).into_dyn();
        let mut bias_data = Array4::<f32>::zeros((1, 2, 3, 3));
        bias_data.index_axis_mut(Axis(3), 2).fill(-1e9);

        let result = run_graph(
            &context,
            &[&attn.output, &attn.weights],
            &[("x", data), ("bias", bias_data.into_dyn())],
            &store,
            &CpuBackend::new(),
        );
        let weights = &result[1];
        assert_eq!(weights.shape(), &[1, 2, 3, 3]);
        for head in 0..2 {
            for query in 0..3 {
                assert!(weights[[0, head, query, 2]] < 1e-6);
                let row_sum: f32 = (0..3).map(|key| weights[[0, head, query, key]]).sum();
                assert!((row_sum - 1.0).abs() < 1e-5);
            }
        }
    }
}
