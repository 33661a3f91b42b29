//! Parameter storage and default initializers.
//!
//! Layers only declare `Parameter` nodes in the graph. The actual weights live
//! in a [`ParameterStore`] owned by whoever runs the graph, keyed by the
//! parameter node names (`"layers.0.self_attention.linear_q.weights"`, ...).

use crate::asg::{Asg, NodeType, Value};
use crate::runtime::backend::Memo;
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

/// Named parameter values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    values: BTreeMap<String, ArrayD<f32>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a parameter, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: ArrayD<f32>) -> Option<ArrayD<f32>> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.values.get(name)
    }

    /// Mutable access for code that updates weights outside a forward pass.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ArrayD<f32>> {
        self.values.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parameter names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    /// Total number of scalar weights.
    pub fn total_elements(&self) -> usize {
        self.values.values().map(|v| v.len()).sum()
    }

    /// Binds stored values to the `Parameter` nodes of `asg`.
    ///
    /// Parameters the store does not know are left unbound; the backend
    /// reports them as missing when it reaches them.
    pub fn to_memo(&self, asg: &Asg) -> Memo<Value> {
        asg.nodes
            .values()
            .filter_map(|node| match &node.node_type {
                NodeType::Parameter { name } => self
                    .values
                    .get(name)
                    .map(|value| ((asg.id, node.id), Value::Tensor(value.clone()))),
                _ => None,
            })
            .collect()
    }
}

/// U(-1/sqrt(fan_in), 1/sqrt(fan_in)), the default for linear weights and biases.
pub fn kaiming_uniform(shape: &[usize], fan_in: usize, rng: &mut StdRng) -> ArrayD<f32> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    ArrayD::random_using(IxDyn(shape), Uniform::new(-bound, bound), rng)
}

/// Standard normal N(0, 1), the default for embedding tables and learned tokens.
pub fn normal(shape: &[usize], rng: &mut StdRng) -> ArrayD<f32> {
    ArrayD::random_using(IxDyn(shape), StandardNormal, rng)
}

pub fn zeros(shape: &[usize]) -> ArrayD<f32> {
    ArrayD::zeros(IxDyn(shape))
}

pub fn ones(shape: &[usize]) -> ArrayD<f32> {
    ArrayD::ones(IxDyn(shape))
}
