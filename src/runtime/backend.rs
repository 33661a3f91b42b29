//! Abstract interface (trait) for execution backends.

use crate::asg::{Asg, AsgId, NodeId, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while a backend evaluates a graph.
/// Shared by every backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Node with ID {0} not found in graph {1}. Check that the graph was built correctly.")]
    NodeNotFound(NodeId, AsgId),

    #[error("Tensor shape error: {0}")]
    ShapeError(String),

    #[error("No value for input '{0}' (node ID: {1}). Bind it in the initial memo before running the graph.")]
    MissingInput(String, NodeId),

    #[error("No value for parameter '{0}' (node ID: {1}). Initialize the parameter before running the graph.")]
    MissingParameter(String, NodeId),

    #[error("Operation '{0}' is not implemented by this backend.")]
    UnimplementedOperation(String),
}

/// Cache of already computed node values, keyed by (AsgId, NodeId).
pub type Memo<T> = HashMap<(AsgId, NodeId), T>;

/// Common interface of an execution environment.
///
/// Anything implementing this trait can take an ASG plus data, run it and
/// hand the results back.
pub trait Backend {
    /// Device-specific representation of data.
    type DeviceData: std::fmt::Debug;

    /// Moves host data onto the device.
    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError>;

    /// Runs the graph, starting from and extending the memo.
    ///
    /// # Arguments
    /// * `main_asg` - Graph to execute.
    /// * `initial_memo` - Values of inputs and parameters, keyed by node.
    ///
    /// # Returns
    /// 1. The values of the graph outputs, in `main_asg.outputs` order.
    /// 2. The final memo with every intermediate value.
    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError>;

    /// Brings results back to the host as `Value`s.
    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError>;
}
