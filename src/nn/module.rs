//! Module defining the core `Module` trait for all neural network layers.

use crate::params::ParameterStore;
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// Trait defining the common interface for all layers/modules.
///
/// In the graph-based architecture, `Module` is any component that can
/// add a specific pattern of operations and parameters to the graph.
pub trait Module {
    /// Performs a "symbolic" forward pass, building the corresponding part of the graph.
    ///
    /// Takes an input symbolic tensor and returns an output symbolic tensor.
    fn forward(&self, inputs: &Tensor) -> Tensor;

    /// Returns a list of all trainable parameters (as symbolic tensors)
    /// that belong to this module.
    fn parameters(&self) -> Vec<Tensor>;

    /// Writes freshly initialized values for every parameter of this module
    /// into `store`, using the layer's default initializer.
    fn reset_parameters(&self, _store: &mut ParameterStore, _rng: &mut StdRng) {}
}

/// Name of a parameter handle. Parameter nodes are always created with one.
pub(crate) fn param_name(tensor: &Tensor) -> String {
    tensor.name().unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::asg::Value;
    use crate::params::ParameterStore;
    use crate::runtime::backend::Backend;
    use crate::runtime::cpu_backend::CpuBackend;
    use crate::tensor::{GraphContext, Tensor};
    use ndarray::ArrayD;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Evaluates `outputs` on the CPU with the given inputs and parameters.
    pub fn run_graph(
        context: &Rc<RefCell<GraphContext>>,
        outputs: &[&Tensor],
        inputs: &[(&str, ArrayD<f32>)],
        store: &ParameterStore,
        backend: &CpuBackend,
    ) -> Vec<ArrayD<f32>> {
        let mut graph = context.borrow().main_graph().clone();
        graph.set_outputs(outputs.iter().map(|t| t.node_id).collect());

        let mut memo = store.to_memo(&graph);
        for (name, data) in inputs {
            let id = graph.find_named(name).expect("input declared in graph");
            memo.insert((graph.id, id), Value::Tensor(data.clone()));
        }
        let (results, _) = backend.run(&graph, memo).expect("graph evaluates");
        results.into_iter().map(Value::into_tensor).collect()
    }
}
