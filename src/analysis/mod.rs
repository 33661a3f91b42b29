//! # Graph Analysis Module
//!
//! This module contains analysis passes that process the ASG before execution.
//!
//! ## Available Passes
//!
//! - [`ShapeInference`](shape_inference::ShapeInference): Propagates tensor shapes
//!   through the graph, detecting shape mismatches before runtime.
//!
//! ## How It Works
//!
//! Analysis passes traverse the graph and compute/validate metadata:
//!
//! ```text
//! ASG (untyped) -> Shape Inference -> ASG (with shapes/dtypes)
//! ```
//!
//! This enables:
//! - **Early error detection**: Shape mismatches caught before execution
//! - **Batch validation**: a model checks a batch against its graph before running it
//!
//! ## Example
//!
//! ```ignore
//! use graphormer::analysis::shape_inference::ShapeInference;
//!
//! let mut graph = context.borrow().main_graph().clone();
//!
//! // Provide initial shapes for inputs
//! let shapes = HashMap::from([
//!     ("input".to_string(), (vec![2, 9, 64], DType::F32)),
//! ]);
//!
//! // Run shape inference
//! ShapeInference::run(&mut graph, &shapes)?;
//!
//! // Now all nodes have shape information
//! ```

pub mod shape_inference;