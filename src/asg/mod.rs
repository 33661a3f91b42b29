//! ASG: abstract semantic graph.
//!
//! Every network in this crate is a set of nodes recorded here. Nodes never
//! hold computed data (apart from literals); backends evaluate them.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Node identifier.
pub type NodeId = usize;
/// Graph identifier.
pub type AsgId = usize;
/// Tensor shape.
pub type Shape = Vec<usize>;

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("Node with ID {0} not found")]
    NodeNotFound(NodeId),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    /// Integral data carried in f32 storage (bucket indices, degrees).
    I32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node ID (duplicates the HashMap key for convenience).
    pub id: NodeId,
    pub name: Option<String>,
    pub node_type: NodeType,
    pub shape: Option<Shape>,
    pub dtype: Option<DType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
    // Data
    Input { name: String },
    Parameter { name: String },
    Literal(Value),

    // Binary, with numpy-style broadcasting
    Add(NodeId, NodeId),
    Subtract(NodeId, NodeId),
    Multiply(NodeId, NodeId),
    Divide(NodeId, NodeId),
    MatrixMultiply(NodeId, NodeId),

    // Unary
    Sqrt(NodeId),
    GELU(NodeId),
    Softmax(NodeId), // over the last axis
    Clamp(NodeId, f32, f32),

    // Reductions
    Mean(NodeId), // over the last axis, keepdim=1

    // Transformations
    Reshape(NodeId, NodeId), // second argument is a shape literal; 0 copies, -1 infers
    Transpose(NodeId, usize, usize),
    Unsqueeze(NodeId, usize),
    /// Fills the shape of the second node with the scalar first node.
    Broadcast(NodeId, NodeId),
    /// Broadcasts `input` so that each axis in `axes` takes its size from `like`.
    BroadcastAxes { input: NodeId, like: NodeId, axes: Vec<usize> },
    Concat { inputs: Vec<NodeId>, axis: usize },
    /// Prepends `amount` entries filled with `fill` along every axis in `axes`.
    PadLeading { input: NodeId, axes: Vec<usize>, amount: usize, fill: f32 },

    // Lookups
    Embedding { indices: NodeId, weight: NodeId },

    // Regularization
    Dropout(NodeId, f32),

    // Checks
    /// Passes the first node through; evaluation fails if its shape differs from the second.
    SameShape(NodeId, NodeId),
}

impl NodeType {
    /// Nodes this node reads, in evaluation order.
    pub fn dependencies(&self) -> Vec<NodeId> {
        match self {
            NodeType::Input { .. } | NodeType::Parameter { .. } | NodeType::Literal(_) => vec![],

            NodeType::Add(a, b)
            | NodeType::Subtract(a, b)
            | NodeType::Multiply(a, b)
            | NodeType::Divide(a, b)
            | NodeType::MatrixMultiply(a, b)
            | NodeType::Reshape(a, b)
            | NodeType::Broadcast(a, b)
            | NodeType::SameShape(a, b) => vec![*a, *b],

            NodeType::Sqrt(a)
            | NodeType::GELU(a)
            | NodeType::Softmax(a)
            | NodeType::Mean(a)
            | NodeType::Clamp(a, _, _)
            | NodeType::Transpose(a, _, _)
            | NodeType::Unsqueeze(a, _)
            | NodeType::Dropout(a, _) => vec![*a],

            NodeType::BroadcastAxes { input, like, .. } => vec![*input, *like],
            NodeType::Concat { inputs, .. } => inputs.clone(),
            NodeType::PadLeading { input, .. } => vec![*input],
            NodeType::Embedding { indices, weight } => vec![*indices, *weight],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(ArrayD<f32>),
    ScalarF32(f32),
}

impl Value {
    /// Borrows the tensor payload, if any.
    pub fn as_tensor(&self) -> Option<&ArrayD<f32>> {
        match self {
            Value::Tensor(arr) => Some(arr),
            Value::ScalarF32(_) => None,
        }
    }

    /// Converts the value into a tensor; scalars become rank-0 arrays.
    pub fn into_tensor(self) -> ArrayD<f32> {
        match self {
            Value::Tensor(arr) => arr,
            Value::ScalarF32(v) => ndarray::arr0(v).into_dyn(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asg {
    pub id: AsgId,
    pub name: Option<String>,
    pub nodes: HashMap<NodeId, Node>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl Asg {
    pub fn new(id: AsgId, name: Option<String>) -> Self {
        Self { id, name, nodes: HashMap::new(), inputs: vec![], outputs: vec![] }
    }

    pub fn add_node(&mut self, name: Option<String>, node_type: NodeType) -> NodeId {
        let new_id = self.nodes.len();
        let mut node = Node { id: new_id, name, node_type, shape: None, dtype: None };

        // Literals know their shape up front so shape inference never misses them.
        match &node.node_type {
            NodeType::Literal(Value::Tensor(arr)) => {
                node.shape = Some(arr.shape().to_vec());
                node.dtype = Some(DType::F32);
            }
            NodeType::Literal(Value::ScalarF32(_)) => {
                node.shape = Some(vec![]);
                node.dtype = Some(DType::F32);
            }
            _ => {}
        }

        self.nodes.insert(new_id, node);
        new_id
    }

    pub fn set_outputs(&mut self, outputs: Vec<NodeId>) { self.outputs = outputs; }

    /// Shortcut for graphs with a single output.
    pub fn set_output(&mut self, output: NodeId) {
        self.set_outputs(vec![output]);
    }

    pub fn get_node(&self, id: NodeId) -> AsgResult<&Node> {
        self.nodes.get(&id).ok_or(AsgError::NodeNotFound(id))
    }

    /// Finds the `Input` or `Parameter` node registered under `name`.
    pub fn find_named(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| match &node.node_type {
                NodeType::Input { name: n } | NodeType::Parameter { name: n } => n == name,
                _ => false,
            })
            .map(|node| node.id)
    }

    /// Names of every `Parameter` node, sorted.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .values()
            .filter_map(|node| match &node.node_type {
                NodeType::Parameter { name } => Some(name.clone()),
                _ => None,
            })
            .collect();
        names.sort();
        names
    }
}
