//! CPU backend for executing an ASG.
//!
//! Walks the computation graph in topological order and evaluates every
//! node with `ndarray`.
//!
//! Dropout is the only stochastic operation. Whether it is active is a
//! property of the backend instance, chosen explicitly by the caller:
//! [`CpuBackend::new`] evaluates in inference mode, [`CpuBackend::training`]
//! draws inverted-dropout masks from a seeded generator.

use super::backend::{Backend, Memo, RuntimeError};
use crate::analysis::shape_inference::{broadcast_shapes, resolve_reshape};
use crate::asg::{Asg, AsgId, NodeId, NodeType, Value};
use libm::erff;
use ndarray::{s, ArrayD, Axis, Ix2, IxDyn, Slice};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::HashMap;
use std::f32::consts::FRAC_1_SQRT_2;

/// Execution context for one graph run on the CPU.
struct ExecutionContext<'a> {
    /// Graphs taking part in the computation.
    graphs: HashMap<AsgId, &'a Asg>,
    /// Cache of computed values, keyed by (AsgId, NodeId).
    memo: Memo<Value>,
    /// Mask generator; `None` means dropout is the identity.
    dropout_rng: Option<&'a RefCell<StdRng>>,
}

impl<'a> ExecutionContext<'a> {
    fn new(main_asg: &'a Asg, initial_memo: Memo<Value>, dropout_rng: Option<&'a RefCell<StdRng>>) -> Self {
        let mut graphs = HashMap::new();
        graphs.insert(main_asg.id, main_asg);
        Self {
            graphs,
            memo: initial_memo,
            dropout_rng,
        }
    }

    /// Computes (or fetches from the memo) the value of a node.
    fn evaluate_node(&mut self, asg_id: AsgId, node_id: NodeId) -> Result<Value, RuntimeError> {
        if let Some(value) = self.memo.get(&(asg_id, node_id)) {
            return Ok(value.clone());
        }

        let asg: &'a Asg = self
            .graphs
            .get(&asg_id)
            .copied()
            .ok_or(RuntimeError::NodeNotFound(node_id, asg_id))?;
        let node = asg
            .nodes
            .get(&node_id)
            .ok_or(RuntimeError::NodeNotFound(node_id, asg_id))?;

        let result = match &node.node_type {
            NodeType::Input { name } => {
                return Err(RuntimeError::MissingInput(name.clone(), node.id));
            }
            NodeType::Parameter { name } => {
                return Err(RuntimeError::MissingParameter(name.clone(), node.id));
            }
            NodeType::Literal(value) => Ok(value.clone()),

            NodeType::Add(l, r) | NodeType::Subtract(l, r) | NodeType::Multiply(l, r) |
            NodeType::Divide(l, r) | NodeType::MatrixMultiply(l, r) | NodeType::Reshape(l, r) |
            NodeType::Broadcast(l, r) | NodeType::SameShape(l, r) => {
                let lhs = self.evaluate_node(asg_id, *l)?;
                let rhs = self.evaluate_node(asg_id, *r)?;
                match &node.node_type {
                    NodeType::Add(_, _) => op_elementwise(lhs, rhs, "Add", |a, b| a + b),
                    NodeType::Subtract(_, _) => op_elementwise(lhs, rhs, "Subtract", |a, b| a - b),
                    NodeType::Multiply(_, _) => op_elementwise(lhs, rhs, "Multiply", |a, b| a * b),
                    NodeType::Divide(_, _) => op_elementwise(lhs, rhs, "Divide", |a, b| a / b),
                    NodeType::MatrixMultiply(_, _) => op_matmul(lhs, rhs),
                    NodeType::Reshape(_, _) => op_reshape(lhs, rhs),
                    NodeType::Broadcast(_, _) => op_broadcast(lhs, rhs),
                    NodeType::SameShape(_, _) => op_same_shape(lhs, rhs),
                    _ => unreachable!(),
                }
            }

            NodeType::Sqrt(op) | NodeType::GELU(op) | NodeType::Softmax(op) | NodeType::Mean(op) => {
                let operand = self.evaluate_node(asg_id, *op)?;
                match &node.node_type {
                    NodeType::Sqrt(_) => op_sqrt(operand),
                    NodeType::GELU(_) => op_gelu(operand),
                    NodeType::Softmax(_) => op_softmax(operand),
                    NodeType::Mean(_) => op_mean(operand),
                    _ => unreachable!(),
                }
            }

            NodeType::Clamp(op, min_val, max_val) => {
                let operand = self.evaluate_node(asg_id, *op)?;
                op_clamp(operand, *min_val, *max_val)
            }

            NodeType::Transpose(op, ax1, ax2) => {
                let operand = self.evaluate_node(asg_id, *op)?;
                op_transpose(operand, *ax1, *ax2)
            }

            NodeType::Unsqueeze(op, axis) => {
                let operand = self.evaluate_node(asg_id, *op)?;
                op_unsqueeze(operand, *axis)
            }

            NodeType::BroadcastAxes { input, like, axes } => {
                let operand = self.evaluate_node(asg_id, *input)?;
                let like_val = self.evaluate_node(asg_id, *like)?;
                op_broadcast_axes(operand, like_val, axes)
            }

            NodeType::Concat { inputs, axis } => {
                let mut values = Vec::with_capacity(inputs.len());
                for id in inputs {
                    values.push(self.evaluate_node(asg_id, *id)?);
                }
                op_concat(values, *axis)
            }

            NodeType::PadLeading { input, axes, amount, fill } => {
                let operand = self.evaluate_node(asg_id, *input)?;
                op_pad_leading(operand, axes, *amount, *fill)
            }

            NodeType::Embedding { indices, weight } => {
                let indices_val = self.evaluate_node(asg_id, *indices)?;
                let weight_val = self.evaluate_node(asg_id, *weight)?;
                op_embedding(indices_val, weight_val)
            }

            NodeType::Dropout(op, p) => {
                let operand = self.evaluate_node(asg_id, *op)?;
                match self.dropout_rng {
                    Some(rng) => op_dropout(operand, *p, &mut rng.borrow_mut()),
                    None => Ok(operand),
                }
            }
        }?;

        self.memo.insert((asg_id, node_id), result.clone());
        Ok(result)
    }
}

/// CPU backend.
pub struct CpuBackend {
    dropout_rng: Option<RefCell<StdRng>>,
}

impl CpuBackend {
    /// Inference backend: dropout nodes pass values through.
    pub fn new() -> Self {
        Self { dropout_rng: None }
    }

    /// Training backend: dropout masks come from a generator seeded with `seed`.
    pub fn training(seed: u64) -> Self {
        Self {
            dropout_rng: Some(RefCell::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn is_training(&self) -> bool {
        self.dropout_rng.is_some()
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    type DeviceData = Value;

    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError> {
        Ok(data.clone())
    }

    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError> {
        let sorted_nodes = crate::analysis::shape_inference::ShapeInference::topological_sort(main_asg)
            .map_err(|e| RuntimeError::ShapeError(format!("Topological sort failed: {:?}", e)))?;

        let mut context = ExecutionContext::new(main_asg, initial_memo, self.dropout_rng.as_ref());

        for node_id in sorted_nodes {
            context.evaluate_node(main_asg.id, node_id)?;
        }

        let mut results = Vec::new();
        for output_node_id in &main_asg.outputs {
            let result = context
                .memo
                .get(&(main_asg.id, *output_node_id))
                .ok_or(RuntimeError::NodeNotFound(*output_node_id, main_asg.id))?
                .clone();
            results.push(result);
        }
        Ok((results, context.memo))
    }

    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError> {
        Ok(device_data.to_vec())
    }
}

fn tensor(value: Value) -> Result<ArrayD<f32>, RuntimeError> {
    match value {
        Value::Tensor(arr) => Ok(arr),
        Value::ScalarF32(v) => Ok(ndarray::arr0(v).into_dyn()),
    }
}

fn op_elementwise(
    lhs: Value,
    rhs: Value,
    op: &str,
    f: impl Fn(&ArrayD<f32>, &ArrayD<f32>) -> ArrayD<f32>,
) -> Result<Value, RuntimeError> {
    let a = tensor(lhs)?;
    let b = tensor(rhs)?;
    if broadcast_shapes(a.shape(), b.shape()).is_none() {
        return Err(RuntimeError::ShapeError(format!(
            "{}: cannot broadcast {:?} with {:?}",
            op,
            a.shape(),
            b.shape()
        )));
    }
    Ok(Value::Tensor(f(&a, &b)))
}

fn op_sqrt(operand: Value) -> Result<Value, RuntimeError> {
    Ok(Value::Tensor(tensor(operand)?.mapv(|x| x.sqrt())))
}

fn op_gelu(operand: Value) -> Result<Value, RuntimeError> {
    // GELU(x) = 0.5 * x * (1 + erf(x / sqrt(2)))
    Ok(Value::Tensor(
        tensor(operand)?.mapv(|x| 0.5 * x * (1.0 + erff(x * FRAC_1_SQRT_2))),
    ))
}

/// NaN lands on `min_val`.
fn op_clamp(operand: Value, min_val: f32, max_val: f32) -> Result<Value, RuntimeError> {
    Ok(Value::Tensor(tensor(operand)?.mapv(|x| {
        if x.is_nan() {
            min_val
        } else {
            x.clamp(min_val, max_val)
        }
    })))
}

fn op_softmax(operand: Value) -> Result<Value, RuntimeError> {
    let mut result = tensor(operand)?;
    if result.ndim() == 0 {
        return Err(RuntimeError::ShapeError("Softmax of a scalar".to_string()));
    }
    let last_axis = Axis(result.ndim() - 1);
    result.lanes_mut(last_axis).into_iter().for_each(|mut row| {
        let max_val = row.iter().fold(f32::NEG_INFINITY, |max, &val| max.max(val));
        row.mapv_inplace(|x| (x - max_val).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    });
    Ok(Value::Tensor(result))
}

fn op_mean(operand: Value) -> Result<Value, RuntimeError> {
    let a = tensor(operand)?;
    if a.ndim() == 0 {
        return Ok(Value::Tensor(a));
    }
    let axis = Axis(a.ndim() - 1);
    let mean = a
        .mean_axis(axis)
        .ok_or_else(|| RuntimeError::ShapeError("Mean over an empty axis".to_string()))?;
    Ok(Value::Tensor(mean.insert_axis(axis)))
}

fn op_transpose(operand: Value, axis1: usize, axis2: usize) -> Result<Value, RuntimeError> {
    let a = tensor(operand)?;
    if axis1 >= a.ndim() || axis2 >= a.ndim() {
        return Err(RuntimeError::ShapeError(format!(
            "Transpose axes ({}, {}) out of range for {:?}",
            axis1,
            axis2,
            a.shape()
        )));
    }
    let mut axes: Vec<_> = (0..a.ndim()).collect();
    axes.swap(axis1, axis2);
    Ok(Value::Tensor(a.permuted_axes(axes)))
}

fn op_unsqueeze(operand: Value, axis: usize) -> Result<Value, RuntimeError> {
    let a = tensor(operand)?;
    if axis > a.ndim() {
        return Err(RuntimeError::ShapeError(format!(
            "Unsqueeze axis {} out of range for {:?}",
            axis,
            a.shape()
        )));
    }
    Ok(Value::Tensor(a.insert_axis(Axis(axis))))
}

fn op_reshape(source: Value, shape_provider: Value) -> Result<Value, RuntimeError> {
    let s = tensor(source)?;
    let p = tensor(shape_provider)?;
    let target: Vec<i64> = p.iter().map(|&x| x as i64).collect();
    let shape = resolve_reshape(s.shape(), &target).ok_or_else(|| {
        RuntimeError::ShapeError(format!("Cannot reshape {:?} into {:?}", s.shape(), target))
    })?;
    let reshaped = s
        .to_shape(shape.as_slice())
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
    Ok(Value::Tensor(reshaped.to_owned()))
}

fn op_broadcast(source: Value, target: Value) -> Result<Value, RuntimeError> {
    let s = tensor(source)?;
    let t = tensor(target)?;
    let target_shape = t.shape();
    if s.len() == 1 {
        let val = s.iter().next().copied().unwrap_or_default();
        return Ok(Value::Tensor(ArrayD::from_elem(target_shape, val)));
    }
    let broadcasted = s.broadcast(target_shape).ok_or_else(|| {
        RuntimeError::ShapeError(format!("Cannot broadcast {:?} to {:?}", s.shape(), target_shape))
    })?;
    Ok(Value::Tensor(broadcasted.to_owned()))
}

fn op_broadcast_axes(source: Value, like: Value, axes: &[usize]) -> Result<Value, RuntimeError> {
    let s = tensor(source)?;
    let l = tensor(like)?;
    let mut target = s.shape().to_vec();
    for &axis in axes {
        if axis >= target.len() || axis >= l.ndim() {
            return Err(RuntimeError::ShapeError(format!(
                "Broadcast axis {} out of range for {:?} / {:?}",
                axis,
                s.shape(),
                l.shape()
            )));
        }
        target[axis] = l.shape()[axis];
    }
    let broadcasted = s.broadcast(IxDyn(&target)).ok_or_else(|| {
        RuntimeError::ShapeError(format!("Cannot broadcast {:?} to {:?}", s.shape(), target))
    })?;
    Ok(Value::Tensor(broadcasted.to_owned()))
}

fn op_concat(values: Vec<Value>, axis: usize) -> Result<Value, RuntimeError> {
    let arrays = values.into_iter().map(tensor).collect::<Result<Vec<_>, _>>()?;
    let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
    let joined = ndarray::concatenate(Axis(axis), &views)
        .map_err(|e| RuntimeError::ShapeError(format!("Concat along axis {}: {}", axis, e)))?;
    Ok(Value::Tensor(joined))
}

fn op_pad_leading(operand: Value, axes: &[usize], amount: usize, fill: f32) -> Result<Value, RuntimeError> {
    let a = tensor(operand)?;
    let mut shape = a.shape().to_vec();
    for &axis in axes {
        if axis >= shape.len() {
            return Err(RuntimeError::ShapeError(format!(
                "Pad axis {} out of range for {:?}",
                axis,
                a.shape()
            )));
        }
        shape[axis] += amount;
    }
    let mut out = ArrayD::from_elem(IxDyn(&shape), fill);
    out.slice_each_axis_mut(|desc| {
        if axes.contains(&desc.axis.index()) {
            Slice::from(amount..)
        } else {
            Slice::from(..)
        }
    })
    .assign(&a);
    Ok(Value::Tensor(out))
}

fn op_same_shape(value: Value, reference: Value) -> Result<Value, RuntimeError> {
    let v = tensor(value)?;
    let r = tensor(reference)?;
    if v.shape() != r.shape() {
        return Err(RuntimeError::ShapeError(format!(
            "Expected shape {:?}, got {:?}",
            r.shape(),
            v.shape()
        )));
    }
    Ok(Value::Tensor(v))
}

fn op_dropout(operand: Value, p: f32, rng: &mut StdRng) -> Result<Value, RuntimeError> {
    let a = tensor(operand)?;
    if p <= 0.0 {
        return Ok(Value::Tensor(a));
    }
    let keep = 1.0 - p;
    Ok(Value::Tensor(a.mapv(|x| {
        if rng.gen::<f32>() < keep { x / keep } else { 0.0 }
    })))
}

fn op_matmul(lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    let a = tensor(lhs)?;
    let b = tensor(rhs)?;
    let shape_err = |a: &ArrayD<f32>, b: &ArrayD<f32>| {
        RuntimeError::ShapeError(format!("Incompatible matmul shapes: {:?} and {:?}", a.shape(), b.shape()))
    };

    if a.ndim() == 4 && b.ndim() == 4 {
        let (b0, b1, m, k, n) = (a.shape()[0], a.shape()[1], a.shape()[2], a.shape()[3], b.shape()[3]);
        if b.shape()[0] != b0 || b.shape()[1] != b1 || b.shape()[2] != k {
            return Err(shape_err(&a, &b));
        }
        let mut out = ArrayD::zeros(IxDyn(&[b0, b1, m, n]));
        for i in 0..b0 {
            for j in 0..b1 {
                let a_mat = a
                    .slice(s![i, j, .., ..])
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
                let b_mat = b
                    .slice(s![i, j, .., ..])
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
                out.slice_mut(s![i, j, .., ..]).assign(&a_mat.dot(&b_mat));
            }
        }
        return Ok(Value::Tensor(out));
    }

    if a.ndim() >= 2 && b.ndim() == 2 {
        let k = a.shape()[a.ndim() - 1];
        if k != b.shape()[0] {
            return Err(shape_err(&a, &b));
        }
        // Fold the leading axes into rows, multiply, then unfold.
        let rows = a.len() / k.max(1);
        let a_mat = a
            .to_shape((rows, k))
            .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
        let b_mat = b
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
        let product = a_mat.dot(&b_mat);
        let mut out_shape = a.shape()[..a.ndim() - 1].to_vec();
        out_shape.push(b.shape()[1]);
        let out = product
            .into_shape_with_order(IxDyn(&out_shape))
            .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
        return Ok(Value::Tensor(out));
    }

    Err(RuntimeError::UnimplementedOperation(format!(
        "Matmul for dims {} and {}",
        a.ndim(),
        b.ndim()
    )))
}

/// Embedding lookup: converts indices to dense vectors.
/// Indices: any shape [*], Weight: [num_embeddings, embedding_dim]
/// Output: [*, embedding_dim]
fn op_embedding(indices: Value, weight: Value) -> Result<Value, RuntimeError> {
    let indices_arr = tensor(indices)?;
    let weight_arr = tensor(weight)?;

    if weight_arr.ndim() != 2 {
        return Err(RuntimeError::ShapeError(format!(
            "Embedding weight must be 2D, got {}D",
            weight_arr.ndim()
        )));
    }

    let num_embeddings = weight_arr.shape()[0];
    let embedding_dim = weight_arr.shape()[1];

    let mut output_shape: Vec<usize> = indices_arr.shape().to_vec();
    output_shape.push(embedding_dim);

    let mut output_data = Vec::with_capacity(indices_arr.len() * embedding_dim);

    // Indices are truncated toward zero, the way an integer cast would.
    for &idx_f32 in indices_arr.iter() {
        if idx_f32.is_nan() || idx_f32 < 0.0 || idx_f32 as usize >= num_embeddings {
            return Err(RuntimeError::ShapeError(format!(
                "Embedding index {} out of bounds for num_embeddings {}",
                idx_f32, num_embeddings
            )));
        }
        output_data.extend(weight_arr.slice(s![idx_f32 as usize, ..]).iter().copied());
    }

    let output = ArrayD::from_shape_vec(IxDyn(&output_shape), output_data)
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;

    Ok(Value::Tensor(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{GraphContext, Tensor};
    use ndarray::{arr2, arr3, Array};
    use std::rc::Rc;

    /// Builds a memo binding every named input of the graph.
    fn bind(graph: &Asg, data: &[(&str, ArrayD<f32>)]) -> Memo<Value> {
        let mut memo = HashMap::new();
        for (name, arr) in data {
            let id = graph.find_named(name).expect("named node present");
            memo.insert((graph.id, id), Value::Tensor(arr.clone()));
        }
        memo
    }

    fn run_single(backend: &CpuBackend, graph: &Asg, memo: Memo<Value>) -> ArrayD<f32> {
        let (results, _) = backend.run(graph, memo).unwrap();
        results.into_iter().next().unwrap().into_tensor()
    }

    #[test]
    fn test_linear_on_rank3_input() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let w = Tensor::new_parameter(&context, "w");
        let b = Tensor::new_parameter(&context, "b");
        let y = &x.dot(&w) + &b;
        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);

        let x_data = arr3(&[[[1.0, 2.0], [3.0, 4.0]], [[0.0, 1.0], [1.0, 0.0]]]).into_dyn();
        let w_data = arr2(&[[1.0, 0.0, 1.0], [0.0, 1.0, 1.0]]).into_dyn();
        let b_data = arr2(&[[0.5, 0.5, 0.5]]).into_dyn();
        let memo = bind(&graph, &[("x", x_data), ("w", w_data), ("b", b_data)]);

        let out = run_single(&CpuBackend::new(), &graph, memo);
        assert_eq!(out.shape(), &[2, 2, 3]);
        assert_eq!(out[[0, 1, 2]], 7.5);
        assert_eq!(out[[1, 0, 0]], 0.5);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let out = op_softmax(Value::Tensor(arr2(&[[1.0, 2.0, 3.0], [0.0, 0.0, -1e9]]).into_dyn()))
            .unwrap()
            .into_tensor();
        for row in out.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!(out[[1, 2]] < 1e-6);
        assert!((out[[1, 0]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_pad_leading_fills_border() {
        let a = Array::from_elem(IxDyn(&[1, 2, 2]), 3.0f32);
        let out = op_pad_leading(Value::Tensor(a), &[1, 2], 1, -1.0).unwrap().into_tensor();
        assert_eq!(out.shape(), &[1, 3, 3]);
        assert_eq!(out[[0, 0, 0]], -1.0);
        assert_eq!(out[[0, 0, 2]], -1.0);
        assert_eq!(out[[0, 2, 0]], -1.0);
        assert_eq!(out[[0, 1, 1]], 3.0);
        assert_eq!(out[[0, 2, 2]], 3.0);
    }

    #[test]
    fn test_embedding_rejects_out_of_range_index() {
        let indices = Value::Tensor(ArrayD::from_shape_vec(IxDyn(&[2]), vec![0.0, 5.0]).unwrap());
        let weight = Value::Tensor(ArrayD::zeros(IxDyn(&[5, 3])));
        assert!(matches!(op_embedding(indices, weight), Err(RuntimeError::ShapeError(_))));
    }

    #[test]
    fn test_embedding_truncates_fractional_index() {
        let indices = Value::Tensor(ArrayD::from_shape_vec(IxDyn(&[1]), vec![2.7]).unwrap());
        let weight = Value::Tensor(
            ArrayD::from_shape_vec(IxDyn(&[3, 2]), vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]).unwrap(),
        );
        let out = op_embedding(indices, weight).unwrap().into_tensor();
        assert_eq!(out.shape(), &[1, 2]);
        assert_eq!(out[[0, 0]], 2.0);
    }

    #[test]
    fn test_embedding_rejects_nan_index() {
        let indices = Value::Tensor(ArrayD::from_shape_vec(IxDyn(&[1]), vec![f32::NAN]).unwrap());
        let weight = Value::Tensor(ArrayD::ones(IxDyn(&[3, 2])));
        assert!(matches!(op_embedding(indices, weight), Err(RuntimeError::ShapeError(_))));
    }

    #[test]
    fn test_clamp_sends_nan_to_lower_bound() {
        let v = Value::Tensor(ArrayD::from_shape_vec(IxDyn(&[3]), vec![f32::NAN, -4.0, 90.0]).unwrap());
        let out = op_clamp(v, 0.0, 39.0).unwrap().into_tensor();
        assert_eq!(out.as_slice().unwrap(), &[0.0, 0.0, 39.0]);
    }

    #[test]
    fn test_gelu_is_exact_erf_form() {
        let v = Value::Tensor(ArrayD::from_shape_vec(IxDyn(&[3]), vec![-3.0, -2.0, 1.5]).unwrap());
        let out = op_gelu(v).unwrap().into_tensor();
        // torch.nn.GELU() reference values
        for (got, want) in out.iter().zip([-0.004_049_6f32, -0.045_500_3, 1.399_797_7]) {
            assert!((got - want).abs() < 1e-5, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_same_shape_mismatch_aborts() {
        let v = Value::Tensor(ArrayD::zeros(IxDyn(&[2, 3])));
        let r = Value::Tensor(ArrayD::zeros(IxDyn(&[3, 2])));
        assert!(matches!(op_same_shape(v, r), Err(RuntimeError::ShapeError(_))));
    }

    #[test]
    fn test_dropout_is_identity_in_inference_mode() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let y = x.dropout(0.5);
        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);

        let data = ArrayD::from_elem(IxDyn(&[4, 4]), 2.0f32);
        let out = run_single(&CpuBackend::new(), &graph, bind(&graph, &[("x", data.clone())]));
        assert_eq!(out, data);
    }

    #[test]
    fn test_dropout_training_is_seeded() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let y = x.dropout(0.5);
        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);

        let data = ArrayD::from_elem(IxDyn(&[16, 16]), 1.0f32);
        let first = run_single(&CpuBackend::training(7), &graph, bind(&graph, &[("x", data.clone())]));
        let second = run_single(&CpuBackend::training(7), &graph, bind(&graph, &[("x", data.clone())]));
        assert_eq!(first, second);
        assert!(first.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        assert!(first.iter().any(|&v| v == 0.0));
        assert!(first.iter().any(|&v| v != 0.0));
        assert!(CpuBackend::training(7).is_training());
        assert!(!CpuBackend::new().is_training());
    }

    #[test]
    fn test_missing_parameter_is_reported() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let w = Tensor::new_parameter(&context, "w");
        let y = w.gelu();
        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);

        let err = CpuBackend::new().run(&graph, HashMap::new()).unwrap_err();
        assert_eq!(err, RuntimeError::MissingParameter("w".to_string(), w.node_id));
    }
}
