//! Structural encodings: pairwise channels that bias attention and the
//! degree tables that shift node features.
//!
//! Every raw value is bucketed before lookup: scale, clamp to the table,
//! truncate toward zero. Out-of-range values are clamped to the nearest
//! bucket and never reported as errors. A NaN score (an undefined Jaccard
//! or Adamic-Adar value) falls into bucket 0, the zeroed padding row, so it
//! contributes no bias.

use crate::nn::{Embedding, Module};
use crate::params::ParameterStore;
use crate::tensor::{GraphContext, Tensor};
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;

/// Buckets of every pairwise structural table.
pub const NUM_SPATIAL_BUCKETS: usize = 40;
/// Buckets of the in/out degree tables.
pub const NUM_DEGREE_BUCKETS: usize = 64;

const MAX_SPATIAL_BUCKET: f32 = (NUM_SPATIAL_BUCKETS - 1) as f32;
const MAX_DEGREE_BUCKET: f32 = (NUM_DEGREE_BUCKETS - 1) as f32;

/// Pairwise structural channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructuralChannel {
    /// Hop count of the shortest path. Always enabled.
    ShortestPathLength,
    /// Number of distinct shortest paths.
    NumShortestPaths,
    /// Jaccard coefficient of the two neighbourhoods.
    Jaccard,
    /// Adamic-Adar index of the pair.
    AdamicAdar,
}

impl StructuralChannel {
    /// Name of the graph input carrying the raw matrix.
    pub fn input_name(self) -> &'static str {
        match self {
            StructuralChannel::ShortestPathLength => "len_shortest_path",
            StructuralChannel::NumShortestPaths => "num_shortest_path",
            StructuralChannel::Jaccard => "undir_jac",
            StructuralChannel::AdamicAdar => "undir_aa",
        }
    }

    /// Parameter name prefix of the channel's table.
    pub fn table_name(self) -> &'static str {
        match self {
            StructuralChannel::ShortestPathLength => "len_shortest_path_encoder",
            StructuralChannel::NumShortestPaths => "num_shortest_path_encoder",
            StructuralChannel::Jaccard => "undir_jac_encoder",
            StructuralChannel::AdamicAdar => "undir_aa_encoder",
        }
    }

    /// Multiplier applied to raw values before clamping.
    pub fn scale(self) -> f32 {
        match self {
            StructuralChannel::ShortestPathLength | StructuralChannel::NumShortestPaths => 1.0,
            StructuralChannel::Jaccard => 30.0,
            StructuralChannel::AdamicAdar => 10.0,
        }
    }

    /// Host-side mirror of [`ChannelEncoder::forward`]'s bucketing.
    #[cfg(test)]
    pub(crate) fn bucket(self, raw: f32) -> usize {
        let scaled = raw * self.scale();
        if scaled.is_nan() {
            0
        } else {
            scaled.clamp(0.0, MAX_SPATIAL_BUCKET) as usize
        }
    }
}

/// A structural channel that turns a raw pairwise matrix into an additive
/// per-head attention bias.
///
/// `forward` takes the raw `[n_graph, n_node, n_node]` matrix and yields
/// `[n_graph, num_heads, n_node, n_node]`.
pub trait StructuralEncoder: Module {
    fn channel(&self) -> StructuralChannel;
}

/// Clamp-and-embed encoder for one pairwise channel.
pub struct ChannelEncoder {
    channel: StructuralChannel,
    table: Embedding,
    context: Rc<RefCell<GraphContext>>,
}

impl ChannelEncoder {
    pub fn new(context: &Rc<RefCell<GraphContext>>, channel: StructuralChannel, num_heads: usize) -> Self {
        Self {
            channel,
            table: Embedding::new(context, NUM_SPATIAL_BUCKETS, num_heads, Some(0), channel.table_name()),
            context: Rc::clone(context),
        }
    }
}

impl Module for ChannelEncoder {
    fn forward(&self, raw: &Tensor) -> Tensor {
        let scaled = if self.channel.scale() == 1.0 {
            raw.clone()
        } else {
            raw * &Tensor::scalar(&self.context, self.channel.scale())
        };
        let buckets = scaled.clamp(0.0, MAX_SPATIAL_BUCKET);
        // [g, n, n, h] -> [g, h, n, n]
        self.table.forward(&buckets).transpose(2, 3).transpose(1, 2)
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.table.parameters()
    }

    fn reset_parameters(&self, store: &mut ParameterStore, rng: &mut StdRng) {
        self.table.reset_parameters(store, rng);
    }
}

impl StructuralEncoder for ChannelEncoder {
    fn channel(&self) -> StructuralChannel {
        self.channel
    }
}

/// Centrality encoding: in- and out-degree embeddings added to node features.
pub struct DegreeEncoder {
    in_degree_encoder: Embedding,
    out_degree_encoder: Embedding,
}

impl DegreeEncoder {
    pub fn new(context: &Rc<RefCell<GraphContext>>, hidden_dim: usize) -> Self {
        Self {
            in_degree_encoder: Embedding::new(context, NUM_DEGREE_BUCKETS, hidden_dim, Some(0), "in_degree_encoder"),
            out_degree_encoder: Embedding::new(context, NUM_DEGREE_BUCKETS, hidden_dim, Some(0), "out_degree_encoder"),
        }
    }

    #[cfg(test)]
    pub(crate) fn bucket(raw: i64) -> usize {
        (raw as f32).clamp(0.0, MAX_DEGREE_BUCKET) as usize
    }

    /// `[n_graph, n_node]` degrees to `[n_graph, n_node, hidden_dim]` offsets.
    pub fn forward(&self, in_degree: &Tensor, out_degree: &Tensor) -> Tensor {
        let in_emb = self.in_degree_encoder.forward(&in_degree.clamp(0.0, MAX_DEGREE_BUCKET));
        let out_emb = self.out_degree_encoder.forward(&out_degree.clamp(0.0, MAX_DEGREE_BUCKET));
        &in_emb + &out_emb
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params = self.in_degree_encoder.parameters();
        params.extend(self.out_degree_encoder.parameters());
        params
    }

    pub fn reset_parameters(&self, store: &mut ParameterStore, rng: &mut StdRng) {
        self.in_degree_encoder.reset_parameters(store, rng);
        self.out_degree_encoder.reset_parameters(store, rng);
    }
}
