//! The Graphormer encoder.
//!
//! The whole network is recorded into one ASG when the model is built.
//! Every forward call validates the batch, infers shapes for its concrete
//! sizes and evaluates the graph on a CPU backend whose dropout mode comes
//! from the caller.

use super::batch::{as_f32, BatchError, GraphBatch};
use super::config::{ConfigError, GraphormerConfig};
use super::structural::{ChannelEncoder, DegreeEncoder, StructuralChannel, StructuralEncoder};
use crate::analysis::shape_inference::{ShapeInference, ShapeInferenceError};
use crate::asg::{Asg, DType, Shape, Value};
use crate::nn::{Dropout, Embedding, EncoderLayer, LayerNorm, Linear, Module};
use crate::params::ParameterStore;
use crate::runtime::backend::{Backend, RuntimeError};
use crate::runtime::cpu_backend::CpuBackend;
use crate::tensor::{GraphContext, Tensor};
use log::{debug, trace, warn};
use ndarray::{Array3, Array4, ArrayD, Dimension};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphormerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("shape inference failed: {0}")]
    ShapeInference(#[from] ShapeInferenceError),

    #[error("graph evaluation failed: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("graph output '{name}' has unexpected shape {shape:?}")]
    UnexpectedOutput { name: &'static str, shape: Vec<usize> },
}

/// How stochastic layers behave during a forward call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardMode {
    /// Dropout is the identity.
    #[default]
    Eval,
    /// Dropout masks are drawn from a generator seeded with `seed`.
    Train { seed: u64 },
}

impl ForwardMode {
    fn backend(self) -> CpuBackend {
        match self {
            ForwardMode::Eval => CpuBackend::new(),
            ForwardMode::Train { seed } => CpuBackend::training(seed),
        }
    }
}

/// Everything a detailed forward call exposes.
#[derive(Debug, Clone)]
pub struct GraphormerOutput {
    /// Final hidden states, `[n_graph, n_node + 1, hidden_dim]`.
    pub hidden: Array3<f32>,
    /// Assembled attention bias, `[n_graph, num_heads, n_node + 1, n_node + 1]`.
    pub attn_bias: Array4<f32>,
    /// Graph token followed by node features, before input dropout.
    pub input_sequence: Array3<f32>,
    /// Attention probabilities of each layer, `[n_graph, num_heads, n_node + 1, n_node + 1]`.
    pub attention: Vec<Array4<f32>>,
}

/// Symbolic handles of the graph outputs.
struct GraphOutputs {
    hidden: Tensor,
    attn_bias: Tensor,
    input_sequence: Tensor,
    attention: Vec<Tensor>,
}

pub struct GraphormerModel {
    config: GraphormerConfig,
    graph: Asg,
    atom_encoder: Linear,
    len_shortest_path_encoder: ChannelEncoder,
    /// Enabled optional pairwise channels, in a fixed order.
    optional_encoders: Vec<Box<dyn StructuralEncoder>>,
    degree_encoder: Option<DegreeEncoder>,
    layers: Vec<EncoderLayer>,
    final_ln: LayerNorm,
    graph_token: Embedding,
    graph_token_virtual_distance: Embedding,
    params: ParameterStore,
}

impl GraphormerModel {
    /// Builds the model with parameters drawn from seed 0.
    pub fn new(config: GraphormerConfig) -> Result<Self, GraphormerError> {
        Self::with_seed(config, 0)
    }

    pub fn with_seed(config: GraphormerConfig, seed: u64) -> Result<Self, GraphormerError> {
        config.validate()?;
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let hidden_dim = config.hidden_dim;
        let num_heads = config.num_heads;

        let atom_encoder = Linear::new(&context, config.num_node_feat, hidden_dim, "atom_encoder");

        let len_shortest_path_encoder =
            ChannelEncoder::new(&context, StructuralChannel::ShortestPathLength, num_heads);
        let mut optional_encoders: Vec<Box<dyn StructuralEncoder>> = Vec::new();
        for (channel, enabled) in [
            (StructuralChannel::NumShortestPaths, config.use_num_spd),
            (StructuralChannel::Jaccard, config.use_cnb_jac),
            (StructuralChannel::AdamicAdar, config.use_cnb_aa),
        ] {
            if enabled {
                optional_encoders.push(Box::new(ChannelEncoder::new(&context, channel, num_heads)));
            }
        }
        let degree_encoder = config
            .use_degree
            .then(|| DegreeEncoder::new(&context, hidden_dim));

        let layers: Vec<EncoderLayer> = (0..config.n_layers)
            .map(|i| {
                EncoderLayer::new(
                    &context,
                    hidden_dim,
                    config.ffn_dim,
                    config.dropout_rate,
                    config.attention_dropout_rate,
                    num_heads,
                    &format!("layers.{}", i),
                )
            })
            .collect();
        let final_ln = LayerNorm::new(&context, hidden_dim, "final_ln");
        let graph_token = Embedding::new(&context, 1, hidden_dim, None, "graph_token");
        let graph_token_virtual_distance =
            Embedding::new(&context, 1, num_heads, None, "graph_token_virtual_distance");
        let input_dropout = Dropout::new(config.input_dropout_rate);

        let mut model = Self {
            config,
            graph: Asg::new(0, None),
            atom_encoder,
            len_shortest_path_encoder,
            optional_encoders,
            degree_encoder,
            layers,
            final_ln,
            graph_token,
            graph_token_virtual_distance,
            params: ParameterStore::new(),
        };

        let outputs = model.build_graph(&context, &input_dropout);
        let mut graph = context.borrow().main_graph().clone();
        graph.set_outputs(
            [&outputs.hidden, &outputs.attn_bias, &outputs.input_sequence]
                .into_iter()
                .chain(outputs.attention.iter())
                .map(|t| t.node_id)
                .collect(),
        );
        debug!(
            "Built Graphormer graph: {} nodes, {} layers, optional channels {:?}",
            graph.nodes.len(),
            model.config.n_layers,
            model.config.enabled_channels()
        );
        model.graph = graph;
        model.reset_parameters(seed);
        Ok(model)
    }

    fn build_graph(&self, context: &Rc<RefCell<GraphContext>>, input_dropout: &Dropout) -> GraphOutputs {
        let x = Tensor::new_input(context, "x");
        let seed = Tensor::new_input(context, "attn_bias");

        // Sum of the pairwise channels, [g, h, n, n].
        let mut spatial = self
            .len_shortest_path_encoder
            .forward(&Tensor::new_input(context, StructuralChannel::ShortestPathLength.input_name()));
        for encoder in &self.optional_encoders {
            let raw = Tensor::new_input(context, encoder.channel().input_name());
            spatial = &spatial + &encoder.forward(&raw);
        }

        // The seed repeated over heads: [g, h, n+1, n+1].
        let per_head_seed = seed.unsqueeze(1).broadcast_axes_like(&spatial, &[1]);
        let inner = spatial.pad_leading(&[2, 3], 1, 0.0);
        let t = self.graph_token_virtual_distance.weight.reshape(vec![1, -1, 1, 1]);
        let border = &spatial.zeros_like().pad_leading(&[2, 3], 1, 1.0) * &t;
        let attn_bias = &(&(&per_head_seed + &inner) + &border) + &seed.unsqueeze(1);

        let mut node_feature = self.atom_encoder.forward(&x);
        if let Some(degree) = &self.degree_encoder {
            let in_degree = Tensor::new_input(context, "in_degree");
            let out_degree = Tensor::new_input(context, "out_degree");
            node_feature = &node_feature + &degree.forward(&in_degree, &out_degree);
        }
        let token = self
            .graph_token
            .weight
            .reshape(vec![1, 1, -1])
            .broadcast_axes_like(&node_feature, &[0]);
        let input_sequence = token.concat(&[&node_feature], 1);

        let mut output = input_dropout.forward(&input_sequence);
        let mut attention = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let step = layer.forward_with_bias(&output, Some(&attn_bias));
            output = step.output;
            attention.push(step.weights);
        }
        let hidden = self.final_ln.forward(&output);

        GraphOutputs {
            hidden,
            attn_bias,
            input_sequence,
            attention,
        }
    }

    pub fn config(&self) -> &GraphormerConfig {
        &self.config
    }

    /// The recorded computation graph.
    pub fn graph(&self) -> &Asg {
        &self.graph
    }

    /// Hidden states `[n_graph, n_node + 1, hidden_dim]`; row 0 is the graph token.
    pub fn forward(&self, batch: &GraphBatch, mode: ForwardMode) -> Result<Array3<f32>, GraphormerError> {
        Ok(self.forward_detailed(batch, mode)?.hidden)
    }

    /// The assembled attention bias for `batch`.
    pub fn attention_bias(&self, batch: &GraphBatch) -> Result<Array4<f32>, GraphormerError> {
        Ok(self.forward_detailed(batch, ForwardMode::Eval)?.attn_bias)
    }

    pub fn forward_detailed(&self, batch: &GraphBatch, mode: ForwardMode) -> Result<GraphormerOutput, GraphormerError> {
        batch.validate(&self.config)?;
        for name in batch.unused_channels(&self.config) {
            warn!("Ignoring '{}': its channel is disabled in this model", name);
        }
        trace!(
            "Graphormer forward: {} graphs x {} nodes, mode {:?}",
            batch.n_graph(),
            batch.n_node(),
            mode
        );

        let feeds = self.feeds(batch);
        let mut graph = self.graph.clone();
        ShapeInference::run(&mut graph, &self.initial_shapes(&feeds))?;

        let backend = mode.backend();
        let mut memo = self.params.to_memo(&graph);
        let device_data = backend.load_data(&feeds)?;
        for (name, value) in device_data {
            if let Some(id) = graph.find_named(&name) {
                memo.insert((graph.id, id), value);
            }
        }
        let (results, _) = backend.run(&graph, memo)?;
        let mut values = backend.retrieve_data(&results)?.into_iter().map(Value::into_tensor);

        let hidden: Array3<f32> = next_output(&mut values, "hidden")?;
        let attn_bias: Array4<f32> = next_output(&mut values, "attn_bias")?;
        let input_sequence: Array3<f32> = next_output(&mut values, "input_sequence")?;
        let attention = values
            .map(|v| into_rank(v, "attention"))
            .collect::<Result<Vec<Array4<f32>>, _>>()?;

        Ok(GraphormerOutput {
            hidden,
            attn_bias,
            input_sequence,
            attention,
        })
    }

    /// Graph inputs for `batch`. Data of disabled channels is left out.
    fn feeds(&self, batch: &GraphBatch) -> HashMap<String, Value> {
        let mut feeds = HashMap::new();
        feeds.insert("x".to_string(), Value::Tensor(batch.x.clone().into_dyn()));
        feeds.insert("attn_bias".to_string(), Value::Tensor(batch.attn_bias.clone().into_dyn()));
        let channels = std::iter::once(self.len_shortest_path_encoder.channel())
            .chain(self.optional_encoders.iter().map(|encoder| encoder.channel()));
        for channel in channels {
            if let Some(data) = batch.channel_data(channel) {
                feeds.insert(channel.input_name().to_string(), Value::Tensor(data));
            }
        }
        if self.degree_encoder.is_some() {
            if let (Some(in_degree), Some(out_degree)) = (&batch.in_degree, &batch.out_degree) {
                feeds.insert("in_degree".to_string(), Value::Tensor(as_f32(in_degree)));
                feeds.insert("out_degree".to_string(), Value::Tensor(as_f32(out_degree)));
            }
        }
        feeds
    }

    fn initial_shapes(&self, feeds: &HashMap<String, Value>) -> HashMap<String, (Shape, DType)> {
        let mut shapes = HashMap::new();
        for (name, value) in feeds {
            let dtype = match name.as_str() {
                "x" | "attn_bias" | "undir_jac" | "undir_aa" => DType::F32,
                _ => DType::I32,
            };
            if let Some(arr) = value.as_tensor() {
                shapes.insert(name.clone(), (arr.shape().to_vec(), dtype));
            }
        }
        for name in self.params.names() {
            if let Some(arr) = self.params.get(name) {
                shapes.insert(name.to_string(), (arr.shape().to_vec(), DType::F32));
            }
        }
        shapes
    }

    /// Replaces every parameter with a fresh default-initialized value.
    pub fn reset_parameters(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = ParameterStore::new();
        for layer in &self.layers {
            layer.reset_parameters(&mut store, &mut rng);
        }
        self.final_ln.reset_parameters(&mut store, &mut rng);
        self.atom_encoder.reset_parameters(&mut store, &mut rng);
        self.len_shortest_path_encoder.reset_parameters(&mut store, &mut rng);
        for encoder in &self.optional_encoders {
            encoder.reset_parameters(&mut store, &mut rng);
        }
        if let Some(degree) = &self.degree_encoder {
            degree.reset_parameters(&mut store, &mut rng);
        }
        self.graph_token.reset_parameters(&mut store, &mut rng);
        self.graph_token_virtual_distance.reset_parameters(&mut store, &mut rng);

        debug!(
            "Reset {} parameters ({} weights) with seed {}",
            store.len(),
            store.total_elements(),
            seed
        );
        self.params = store;
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    /// Mutable access for external weight updates between forward calls.
    pub fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.params
    }

    /// Number of scalar weights.
    pub fn num_parameters(&self) -> usize {
        self.params.total_elements()
    }
}

fn into_rank<D: Dimension>(value: ArrayD<f32>, name: &'static str) -> Result<ndarray::Array<f32, D>, GraphormerError> {
    let shape = value.shape().to_vec();
    value
        .into_dimensionality::<D>()
        .map_err(|_| GraphormerError::UnexpectedOutput { name, shape })
}

fn next_output<D: Dimension>(
    values: &mut impl Iterator<Item = ArrayD<f32>>,
    name: &'static str,
) -> Result<ndarray::Array<f32, D>, GraphormerError> {
    let value = values
        .next()
        .ok_or(GraphormerError::UnexpectedOutput { name, shape: Vec::new() })?;
    into_rank(value, name)
}
