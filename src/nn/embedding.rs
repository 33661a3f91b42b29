//! Embedding layer.
//!
//! Maps integer indices to dense vectors of a fixed dimension. Indices are
//! carried in f32 tensors and truncated toward zero at lookup.

use super::module::{param_name, Module};
use crate::params::{normal, ParameterStore};
use crate::tensor::{GraphContext, Tensor};
use ndarray::Axis;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;

/// Embedding table of shape `[num_embeddings, embedding_dim]`.
///
/// When `padding_idx` is set, that row is zeroed on every reset.
///
/// ```ignore
/// let context = Rc::new(RefCell::new(GraphContext::new()));
/// let embedding = Embedding::new(&context, 64, 256, Some(0), "in_degree_encoder");
///
/// let degrees = Tensor::new_input(&context, "in_degree"); // [n_graph, n_node]
/// let embedded = embedding.forward(&degrees); // [n_graph, n_node, 256]
/// ```
#[derive(Debug, Clone)]
pub struct Embedding {
    pub num_embeddings: usize,
    pub embedding_dim: usize,
    pub padding_idx: Option<usize>,
    pub weight: Tensor,
}

impl Embedding {
    /// Registers `"{name}_weight"` in the graph.
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        num_embeddings: usize,
        embedding_dim: usize,
        padding_idx: Option<usize>,
        name: &str,
    ) -> Self {
        assert!(
            padding_idx.map_or(true, |idx| idx < num_embeddings),
            "padding_idx must be smaller than num_embeddings ({})",
            num_embeddings
        );
        let weight = Tensor::new_parameter(context, &format!("{}_weight", name));

        Self {
            num_embeddings,
            embedding_dim,
            padding_idx,
            weight,
        }
    }
}

impl Module for Embedding {
    /// Indices of any shape `[*]` give `[*, embedding_dim]`.
    fn forward(&self, input: &Tensor) -> Tensor {
        input.embedding(&self.weight)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone()]
    }

    fn reset_parameters(&self, store: &mut ParameterStore, rng: &mut StdRng) {
        let mut table = normal(&[self.num_embeddings, self.embedding_dim], rng);
        if let Some(idx) = self.padding_idx {
            table.index_axis_mut(Axis(0), idx).fill(0.0);
        }
        store.insert(param_name(&self.weight), table);
    }
}
