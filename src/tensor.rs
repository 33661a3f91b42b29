//! Defines `Tensor` and `GraphContext`.
//!
//! `Tensor` is not a data container. It is a lightweight handle to a node of
//! the abstract semantic graph (ASG). Every operation on a handle (`dot`,
//! `+`, `softmax`, ...) records a new node instead of computing anything.
//!
//! `GraphContext` owns the graph being built and is shared by all handles.

use crate::asg::{Asg, NodeId, NodeType, Value};
use ndarray::{arr0, Array1, ArrayD};
use std::cell::RefCell;
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;

/// Owns the graph under construction.
///
/// Wrapped in `Rc<RefCell<>>` so that many `Tensor` handles can share it.
#[derive(Debug, Clone)]
pub struct GraphContext {
    main_graph: Asg,
}

impl GraphContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self {
            main_graph: Asg::new(0, Some("main".to_string())),
        }
    }

    /// Mutable access to the main graph while building it.
    pub fn main_graph_mut(&mut self) -> &mut Asg {
        &mut self.main_graph
    }

    /// Immutable access to the main graph.
    pub fn main_graph(&self) -> &Asg {
        &self.main_graph
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Symbolic handle to a node of the ASG.
///
/// Holds no data: only the node ID and the context the node lives in.
#[derive(Debug, Clone)]
pub struct Tensor {
    /// ID of the node this handle represents.
    pub node_id: NodeId,
    /// Shared reference to the context the graph is built in.
    pub context: Rc<RefCell<GraphContext>>,
}

impl Tensor {
    fn record(context: &Rc<RefCell<GraphContext>>, name: Option<String>, node_type: NodeType) -> Self {
        let node_id = context.borrow_mut().main_graph_mut().add_node(name, node_type);
        Self {
            node_id,
            context: Rc::clone(context),
        }
    }

    fn unary(&self, node_type: NodeType) -> Self {
        Self::record(&self.context, None, node_type)
    }

    /// Creates an `Input` node: a graph variable fed with real data at run time.
    pub fn new_input(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        let tensor = Self::record(
            context,
            Some(name.to_string()),
            NodeType::Input {
                name: name.to_string(),
            },
        );
        context.borrow_mut().main_graph_mut().inputs.push(tensor.node_id);
        tensor
    }

    /// Creates a `Parameter` node: a trainable weight fed from a parameter store.
    pub fn new_parameter(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        Self::record(
            context,
            Some(name.to_string()),
            NodeType::Parameter {
                name: name.to_string(),
            },
        )
    }

    /// Creates a constant node embedding `data` directly in the graph.
    pub fn new_literal(context: &Rc<RefCell<GraphContext>>, data: ArrayD<f32>, name: &str) -> Self {
        Self::record(context, Some(name.to_string()), NodeType::Literal(Value::Tensor(data)))
    }

    /// Rank-0 literal.
    pub fn scalar(context: &Rc<RefCell<GraphContext>>, value: f32) -> Self {
        Self::new_literal(context, arr0(value).into_dyn(), "scalar")
    }

    /// Name of the underlying node, if it has one.
    pub fn name(&self) -> Option<String> {
        self.context
            .borrow()
            .main_graph()
            .get_node(self.node_id)
            .ok()
            .and_then(|node| node.name.clone())
    }

    // --- Math ---

    pub fn dot(&self, other: &Tensor) -> Self {
        self.unary(NodeType::MatrixMultiply(self.node_id, other.node_id))
    }

    pub fn sqrt(&self) -> Self {
        self.unary(NodeType::Sqrt(self.node_id))
    }

    pub fn clamp(&self, min: f32, max: f32) -> Self {
        self.unary(NodeType::Clamp(self.node_id, min, max))
    }

    // --- Activations ---

    pub fn gelu(&self) -> Self {
        self.unary(NodeType::GELU(self.node_id))
    }

    /// Softmax over the last axis.
    pub fn softmax(&self) -> Self {
        self.unary(NodeType::Softmax(self.node_id))
    }

    // --- Reductions ---

    /// Mean over the last axis, keeping it with size 1.
    pub fn mean(&self) -> Self {
        self.unary(NodeType::Mean(self.node_id))
    }

    // --- Transformations ---

    /// Reshapes to `shape`; `0` copies the input dimension at that position, `-1` is inferred.
    pub fn reshape(&self, shape: Vec<i64>) -> Self {
        let shape_data = Array1::from(shape).mapv(|x| x as f32).into_dyn();
        let shape_node = Self::record(
            &self.context,
            None,
            NodeType::Literal(Value::Tensor(shape_data)),
        );
        self.unary(NodeType::Reshape(self.node_id, shape_node.node_id))
    }

    pub fn transpose(&self, axis1: usize, axis2: usize) -> Self {
        self.unary(NodeType::Transpose(self.node_id, axis1, axis2))
    }

    /// Inserts an axis of size 1 at `axis`.
    pub fn unsqueeze(&self, axis: usize) -> Self {
        self.unary(NodeType::Unsqueeze(self.node_id, axis))
    }

    /// Fills the shape of `like` with this scalar.
    pub fn broadcast_like(&self, like: &Tensor) -> Self {
        self.unary(NodeType::Broadcast(self.node_id, like.node_id))
    }

    /// Broadcasts size-1 `axes` of this tensor to the sizes `like` has on those axes.
    pub fn broadcast_axes_like(&self, like: &Tensor, axes: &[usize]) -> Self {
        self.unary(NodeType::BroadcastAxes {
            input: self.node_id,
            like: like.node_id,
            axes: axes.to_vec(),
        })
    }

    /// Concatenates `self` followed by `others` along `axis`.
    pub fn concat(&self, others: &[&Tensor], axis: usize) -> Self {
        let mut inputs = vec![self.node_id];
        inputs.extend(others.iter().map(|t| t.node_id));
        self.unary(NodeType::Concat { inputs, axis })
    }

    /// Prepends `amount` entries of `fill` along each of `axes`.
    pub fn pad_leading(&self, axes: &[usize], amount: usize, fill: f32) -> Self {
        self.unary(NodeType::PadLeading {
            input: self.node_id,
            axes: axes.to_vec(),
            amount,
            fill,
        })
    }

    /// Zeros with this tensor's shape.
    pub fn zeros_like(&self) -> Self {
        Tensor::scalar(&self.context, 0.0).broadcast_like(self)
    }

    /// Looks up rows of `weight` ([num_embeddings, dim]) at the indices held by `self`.
    pub fn embedding(&self, weight: &Tensor) -> Self {
        self.unary(NodeType::Embedding {
            indices: self.node_id,
            weight: weight.node_id,
        })
    }

    /// Inverted dropout with drop probability `p`; identity outside training.
    pub fn dropout(&self, p: f32) -> Self {
        self.unary(NodeType::Dropout(self.node_id, p))
    }

    /// Identity that aborts evaluation unless this tensor has the shape of `reference`.
    pub fn same_shape_as(&self, reference: &Tensor) -> Self {
        self.unary(NodeType::SameShape(self.node_id, reference.node_id))
    }
}

// Operators for `&a + &b` style graph building.

impl Add<&Tensor> for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Self::Output {
        self.unary(NodeType::Add(self.node_id, rhs.node_id))
    }
}

impl Add<&Tensor> for Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Self::Output {
        &self + rhs
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: &Tensor) -> Self::Output {
        self.unary(NodeType::Subtract(self.node_id, rhs.node_id))
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: &Tensor) -> Self::Output {
        self.unary(NodeType::Multiply(self.node_id, rhs.node_id))
    }
}

impl Div<&Tensor> for &Tensor {
    type Output = Tensor;
    fn div(self, rhs: &Tensor) -> Self::Output {
        self.unary(NodeType::Divide(self.node_id, rhs.node_id))
    }
}
