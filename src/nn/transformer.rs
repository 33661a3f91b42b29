//! Pre-norm transformer encoder layer in the graph architecture.

use crate::nn::attention::AttentionOutput;
use crate::nn::{Dropout, FeedForward, LayerNorm, Module, MultiHeadAttention};
use crate::params::ParameterStore;
use crate::tensor::{GraphContext, Tensor};
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;

/// One encoder layer:
///
/// ```text
/// x = x + dropout(attention(ln1(x), bias))
/// x = x + dropout(ffn(ln2(x)))
/// ```
pub struct EncoderLayer {
    self_attention_norm: LayerNorm,
    self_attention: MultiHeadAttention,
    self_attention_dropout: Dropout,
    ffn_norm: LayerNorm,
    ffn: FeedForward,
    ffn_dropout: Dropout,
}

impl EncoderLayer {
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        hidden_dim: usize,
        ffn_dim: usize,
        dropout_rate: f32,
        attention_dropout_rate: f32,
        num_heads: usize,
        name: &str,
    ) -> Self {
        Self {
            self_attention_norm: LayerNorm::new(context, hidden_dim, &format!("{}.self_attention_norm", name)),
            self_attention: MultiHeadAttention::new(
                context,
                hidden_dim,
                attention_dropout_rate,
                num_heads,
                &format!("{}.self_attention", name),
            ),
            self_attention_dropout: Dropout::new(dropout_rate),
            ffn_norm: LayerNorm::new(context, hidden_dim, &format!("{}.ffn_norm", name)),
            ffn: FeedForward::new(context, hidden_dim, ffn_dim, &format!("{}.ffn", name)),
            ffn_dropout: Dropout::new(dropout_rate),
        }
    }

    /// Runs the layer with an attention bias shared by all positions.
    /// Returns the new hidden states and the layer's attention probabilities.
    pub fn forward_with_bias(&self, x: &Tensor, attn_bias: Option<&Tensor>) -> AttentionOutput {
        let y = self.self_attention_norm.forward(x);
        let attn = self.self_attention.forward_with_bias(&y, &y, &y, attn_bias);
        let y = self.self_attention_dropout.forward(&attn.output);
        let x = x + &y;

        let y = self.ffn_norm.forward(&x);
        let y = self.ffn.forward(&y);
        let y = self.ffn_dropout.forward(&y);
        let output = &x + &y;

        AttentionOutput {
            output,
            weights: attn.weights,
        }
    }
}

impl Module for EncoderLayer {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        self.forward_with_bias(inputs, None).output
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = Vec::new();
        params.extend(self.self_attention_norm.parameters());
        params.extend(self.self_attention.parameters());
        params.extend(self.ffn_norm.parameters());
        params.extend(self.ffn.parameters());
        params
    }

    fn reset_parameters(&self, store: &mut ParameterStore, rng: &mut StdRng) {
        self.self_attention_norm.reset_parameters(store, rng);
        self.self_attention.reset_parameters(store, rng);
        self.ffn_norm.reset_parameters(store, rng);
        self.ffn.reset_parameters(store, rng);
    }
}
