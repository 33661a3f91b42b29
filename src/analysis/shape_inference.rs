//! Module for shape and data type inference (Shape Inference).
//!
//! Traverses the computation graph and determines the shape
//! and data type of the output tensor for each node based on its input shapes and operation type.

use crate::asg::{Asg, AsgError, DType, Node, NodeId, NodeType, Shape, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeInferenceError {
    #[error("Graph error: {0}")]
    AsgError(#[from] AsgError),

    #[error("Incompatible shapes for operation '{op}': left operand {shape1:?}, right operand {shape2:?}. \
             Ensure dimensions are compatible for broadcasting or matrix multiplication.")]
    IncompatibleShapes {
        op: String,
        shape1: Shape,
        shape2: Shape,
    },

    #[error("Shape information missing for node {0}. \
             This may mean the node has not been processed by shape inference yet or the graph contains a cyclic dependency.")]
    MissingShapeInfo(NodeId),

    #[error("Initial shape not specified for '{0}'. \
             Add the shape to the initial_shapes HashMap when calling ShapeInference::run().")]
    MissingInitialShape(String),

    #[error("Invalid tensor rank for node {node_id}: expected {expected}D, got {actual}D. \
             Check input data dimensions.")]
    InvalidRank {
        node_id: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("Node {0} must be a Literal for shape computation (e.g., for Reshape operation). \
             Dynamic shapes are not supported.")]
    NotALiteral(NodeId),

    #[error("Cannot reshape {from:?} into {target:?} at node {node_id}.")]
    ReshapeError {
        node_id: NodeId,
        from: Shape,
        target: Vec<i64>,
    },

    #[error("Broadcast error: cannot broadcast shapes {0:?} and {1:?} to a common shape.")]
    BroadcastError(Shape, Shape),
}

type Result<T> = std::result::Result<T, ShapeInferenceError>;

/// Numpy-style broadcast of two shapes, `None` if they are incompatible.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Shape> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

/// Resolves a reshape target against the source shape: `0` copies the
/// source dimension at the same position, a single `-1` is inferred.
pub fn resolve_reshape(source: &[usize], target: &[i64]) -> Option<Shape> {
    let total: usize = source.iter().product();
    let mut out = Vec::with_capacity(target.len());
    let mut infer_at = None;
    for (i, &dim) in target.iter().enumerate() {
        match dim {
            0 => out.push(*source.get(i)?),
            -1 if infer_at.is_none() => {
                infer_at = Some(i);
                out.push(1);
            }
            d if d > 0 => out.push(d as usize),
            _ => return None,
        }
    }
    let known: usize = out.iter().product();
    if let Some(i) = infer_at {
        if known == 0 || total % known != 0 {
            return None;
        }
        out[i] = total / known;
    }
    if out.iter().product::<usize>() != total {
        return None;
    }
    Some(out)
}

/// Structure that performs shape inference for ASG.
pub struct ShapeInference;

impl ShapeInference {
    /// Runs the shape inference process for the graph.
    ///
    /// Modifies the graph in-place, filling in the `shape` and `dtype` fields for each node.
    ///
    /// # Arguments
    /// * `asg` - Mutable reference to the graph to analyze.
    /// * `initial_shapes` - HashMap providing shapes and types for all
    ///   `Input` and `Parameter` nodes. Key is the node name.
    pub fn run(asg: &mut Asg, initial_shapes: &HashMap<String, (Shape, DType)>) -> Result<()> {
        let sorted_nodes = Self::topological_sort(asg)?;

        for node_id in sorted_nodes {
            let mut node = asg.get_node(node_id)?.clone();

            let (shape, dtype) = Self::infer_node_shape(asg, &node, initial_shapes)?;

            node.shape = Some(shape);
            node.dtype = Some(dtype);
            asg.nodes.insert(node_id, node);
        }

        Ok(())
    }

    /// Main shape inference logic for a single node.
    fn infer_node_shape(
        asg: &Asg,
        node: &Node,
        initial_shapes: &HashMap<String, (Shape, DType)>,
    ) -> Result<(Shape, DType)> {
        match &node.node_type {
            NodeType::Input { name } | NodeType::Parameter { name } => initial_shapes
                .get(name)
                .cloned()
                .ok_or_else(|| ShapeInferenceError::MissingInitialShape(name.clone())),

            NodeType::Literal(value) => match value {
                Value::Tensor(arr) => Ok((arr.shape().to_vec(), DType::F32)),
                Value::ScalarF32(_) => Ok((vec![], DType::F32)),
            },

            NodeType::Add(l, r)
            | NodeType::Subtract(l, r)
            | NodeType::Multiply(l, r)
            | NodeType::Divide(l, r) => {
                let (ls, ld) = Self::get_shape_dtype(asg, *l)?;
                let (rs, _rd) = Self::get_shape_dtype(asg, *r)?;
                let out_shape = broadcast_shapes(&ls, &rs)
                    .ok_or(ShapeInferenceError::BroadcastError(ls, rs))?;
                Ok((out_shape, ld))
            }

            NodeType::MatrixMultiply(l, r) => {
                let (ls, ld) = Self::get_shape_dtype(asg, *l)?;
                let (rs, _) = Self::get_shape_dtype(asg, *r)?;

                let batched = ls.len() == 4 && rs.len() == 4;
                if ls.len() < 2 || !(rs.len() == 2 || batched) {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: 2,
                        actual: if ls.len() < 2 { ls.len() } else { rs.len() },
                    });
                }

                let m = ls[ls.len() - 2];
                let k1 = ls[ls.len() - 1];
                let k2 = rs[rs.len() - 2];
                let n = rs[rs.len() - 1];

                if k1 != k2 || (batched && ls[..2] != rs[..2]) {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "MatrixMultiply".to_string(),
                        shape1: ls,
                        shape2: rs,
                    });
                }

                let mut out_shape = ls[..ls.len() - 2].to_vec();
                out_shape.push(m);
                out_shape.push(n);

                Ok((out_shape, ld))
            }

            // Element-wise operations - shape unchanged
            NodeType::Sqrt(id)
            | NodeType::GELU(id)
            | NodeType::Softmax(id)
            | NodeType::Clamp(id, _, _)
            | NodeType::Dropout(id, _) => Self::get_shape_dtype(asg, *id),

            NodeType::Mean(id) => {
                let (mut shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                // Keep the reduced axis with size 1 so the result broadcasts back.
                if let Some(last) = shape.last_mut() {
                    *last = 1;
                }
                Ok((shape, dtype))
            }

            NodeType::Transpose(id, axis1, axis2) => {
                let (mut shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                if *axis1 >= shape.len() || *axis2 >= shape.len() {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: axis1.max(axis2) + 1,
                        actual: shape.len(),
                    });
                }
                shape.swap(*axis1, *axis2);
                Ok((shape, dtype))
            }

            NodeType::Unsqueeze(id, axis) => {
                let (mut shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                if *axis > shape.len() {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: *axis,
                        actual: shape.len(),
                    });
                }
                shape.insert(*axis, 1);
                Ok((shape, dtype))
            }

            NodeType::Reshape(data_id, shape_id) => {
                let (source, dtype) = Self::get_shape_dtype(asg, *data_id)?;
                let shape_node = asg.get_node(*shape_id)?;
                if let NodeType::Literal(Value::Tensor(shape_tensor)) = &shape_node.node_type {
                    let target: Vec<i64> = shape_tensor.iter().map(|&x| x as i64).collect();
                    let new_shape = resolve_reshape(&source, &target).ok_or_else(|| {
                        ShapeInferenceError::ReshapeError {
                            node_id: node.id,
                            from: source.clone(),
                            target: target.clone(),
                        }
                    })?;
                    Ok((new_shape, dtype))
                } else {
                    Err(ShapeInferenceError::NotALiteral(*shape_id))
                }
            }

            NodeType::Broadcast(source_id, target_id) => {
                let (_, dtype) = Self::get_shape_dtype(asg, *source_id)?;
                let (target_shape, _) = Self::get_shape_dtype(asg, *target_id)?;
                Ok((target_shape, dtype))
            }

            NodeType::BroadcastAxes { input, like, axes } => {
                let (mut shape, dtype) = Self::get_shape_dtype(asg, *input)?;
                let (like_shape, _) = Self::get_shape_dtype(asg, *like)?;
                for &axis in axes {
                    if axis >= shape.len() || axis >= like_shape.len() {
                        return Err(ShapeInferenceError::InvalidRank {
                            node_id: node.id,
                            expected: axis + 1,
                            actual: shape.len().min(like_shape.len()),
                        });
                    }
                    if shape[axis] != 1 && shape[axis] != like_shape[axis] {
                        return Err(ShapeInferenceError::BroadcastError(shape, like_shape));
                    }
                    shape[axis] = like_shape[axis];
                }
                Ok((shape, dtype))
            }

            NodeType::Concat { inputs, axis } => {
                let (first, dtype) = match inputs.first() {
                    Some(id) => Self::get_shape_dtype(asg, *id)?,
                    None => return Err(ShapeInferenceError::MissingShapeInfo(node.id)),
                };
                if *axis >= first.len() {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: axis + 1,
                        actual: first.len(),
                    });
                }
                let mut out_shape = first.clone();
                for id in &inputs[1..] {
                    let (shape, _) = Self::get_shape_dtype(asg, *id)?;
                    let compatible = shape.len() == first.len()
                        && shape
                            .iter()
                            .zip(first.iter())
                            .enumerate()
                            .all(|(i, (a, b))| i == *axis || a == b);
                    if !compatible {
                        return Err(ShapeInferenceError::IncompatibleShapes {
                            op: "Concat".to_string(),
                            shape1: first,
                            shape2: shape,
                        });
                    }
                    out_shape[*axis] += shape[*axis];
                }
                Ok((out_shape, dtype))
            }

            NodeType::PadLeading { input, axes, amount, .. } => {
                let (mut shape, dtype) = Self::get_shape_dtype(asg, *input)?;
                for &axis in axes {
                    if axis >= shape.len() {
                        return Err(ShapeInferenceError::InvalidRank {
                            node_id: node.id,
                            expected: axis + 1,
                            actual: shape.len(),
                        });
                    }
                    shape[axis] += amount;
                }
                Ok((shape, dtype))
            }

            // Embedding: indices[*] + weight[num_embeddings, embedding_dim] -> [*, embedding_dim]
            NodeType::Embedding { indices, weight } => {
                let (indices_shape, _) = Self::get_shape_dtype(asg, *indices)?;
                let (weight_shape, dtype) = Self::get_shape_dtype(asg, *weight)?;

                if weight_shape.len() != 2 {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: 2,
                        actual: weight_shape.len(),
                    });
                }

                let mut output_shape = indices_shape;
                output_shape.push(weight_shape[1]);
                Ok((output_shape, dtype))
            }

            NodeType::SameShape(value, reference) => {
                let (shape, dtype) = Self::get_shape_dtype(asg, *value)?;
                let (expected, _) = Self::get_shape_dtype(asg, *reference)?;
                if shape != expected {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "SameShape".to_string(),
                        shape1: shape,
                        shape2: expected,
                    });
                }
                Ok((shape, dtype))
            }
        }
    }

    /// Helper function to get already computed shape and type for a node.
    fn get_shape_dtype(asg: &Asg, node_id: NodeId) -> Result<(Shape, DType)> {
        let node = asg.get_node(node_id)?;
        match (&node.shape, &node.dtype) {
            (Some(s), Some(d)) => Ok((s.clone(), *d)),
            _ => Err(ShapeInferenceError::MissingShapeInfo(node_id)),
        }
    }

    /// Performs topological sort of the graph.
    /// Returns a vector of node IDs in order suitable for computation.
    pub fn topological_sort(asg: &Asg) -> Result<Vec<NodeId>> {
        let mut sorted = Vec::new();
        let mut visited = HashSet::new();
        // Every output must be reachable, not only the first one.
        for output_id in &asg.outputs {
            Self::build_sorted_graph(*output_id, asg, &mut visited, &mut sorted)?;
        }
        Ok(sorted)
    }

    fn build_sorted_graph(
        node_id: NodeId,
        asg: &Asg,
        visited: &mut HashSet<NodeId>,
        sorted: &mut Vec<NodeId>,
    ) -> Result<()> {
        if visited.contains(&node_id) {
            return Ok(());
        }

        let node = asg.get_node(node_id)?;
        for input_id in node.node_type.dependencies() {
            Self::build_sorted_graph(input_id, asg, visited, sorted)?;
        }

        if !visited.contains(&node_id) {
            visited.insert(node_id);
            sorted.push(node_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{GraphContext, Tensor};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(broadcast_shapes(&[2, 1, 4], &[3, 1]), Some(vec![2, 3, 4]));
        assert_eq!(broadcast_shapes(&[], &[5]), Some(vec![5]));
        assert_eq!(broadcast_shapes(&[2, 3], &[4, 3]), None);
    }

    #[test]
    fn test_resolve_reshape() {
        assert_eq!(resolve_reshape(&[2, 5, 8], &[0, 0, 2, 4]), Some(vec![2, 5, 2, 4]));
        assert_eq!(resolve_reshape(&[2, 5, 2, 4], &[0, 0, -1]), Some(vec![2, 5, 8]));
        assert_eq!(resolve_reshape(&[2, 5, 8], &[0, 0, 3]), None);
        assert_eq!(resolve_reshape(&[6], &[-1, -1]), None);
    }

    #[test]
    fn test_linear_shapes() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let w = Tensor::new_parameter(&context, "w");
        let b = Tensor::new_parameter(&context, "b");
        let y = &x.dot(&w) + &b;

        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);

        let shapes = HashMap::from([
            ("x".to_string(), (vec![2, 5, 8], DType::F32)),
            ("w".to_string(), (vec![8, 3], DType::F32)),
            ("b".to_string(), (vec![1, 3], DType::F32)),
        ]);
        ShapeInference::run(&mut graph, &shapes).unwrap();
        assert_eq!(graph.get_node(y.node_id).unwrap().shape, Some(vec![2, 5, 3]));
    }

    #[test]
    fn test_matmul_dimension_mismatch_fails_fast() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let w = Tensor::new_parameter(&context, "w");
        let y = x.dot(&w);

        let mut graph = context.borrow().main_graph().clone();
        graph.set_output(y.node_id);

        let shapes = HashMap::from([
            ("x".to_string(), (vec![2, 5, 8], DType::F32)),
            ("w".to_string(), (vec![7, 3], DType::F32)),
        ]);
        let err = ShapeInference::run(&mut graph, &shapes).unwrap_err();
        assert!(matches!(err, ShapeInferenceError::IncompatibleShapes { .. }));
    }

    #[test]
    fn test_pad_concat_and_same_shape() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let bias = Tensor::new_input(&context, "bias");
        let token = Tensor::new_parameter(&context, "token");
        let nodes = Tensor::new_input(&context, "nodes");

        let padded = bias.pad_leading(&[2, 3], 1, 0.0);
        let seq = token
            .reshape(vec![1, 1, -1])
            .broadcast_axes_like(&nodes, &[0])
            .concat(&[&nodes], 1);
        let checked = seq.same_shape_as(&seq);

        let mut graph = context.borrow().main_graph().clone();
        graph.set_outputs(vec![padded.node_id, checked.node_id]);

        let shapes = HashMap::from([
            ("bias".to_string(), (vec![2, 4, 3, 3], DType::F32)),
            ("token".to_string(), (vec![1, 8], DType::F32)),
            ("nodes".to_string(), (vec![2, 3, 8], DType::F32)),
        ]);
        ShapeInference::run(&mut graph, &shapes).unwrap();
        assert_eq!(graph.get_node(padded.node_id).unwrap().shape, Some(vec![2, 4, 4, 4]));
        assert_eq!(graph.get_node(checked.node_id).unwrap().shape, Some(vec![2, 4, 8]));
    }

    #[test]
    fn test_topological_sort_visits_every_output() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let a = Tensor::new_input(&context, "a");
        let b = a.gelu();
        let c = a.softmax();

        let mut graph = context.borrow().main_graph().clone();
        graph.set_outputs(vec![b.node_id, c.node_id]);
        let order = ShapeInference::topological_sort(&graph).unwrap();
        assert_eq!(order, vec![a.node_id, b.node_id, c.node_id]);
    }
}
