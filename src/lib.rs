//! # Graphormer on an Abstract Semantic Graph
//!
//! A Graphormer encoder built the way every network in this crate is built:
//! layers record operations into an **Abstract Semantic Graph (ASG)**, and a
//! backend evaluates that graph with concrete data.
//!
//! ## Usage Example
//!
//! ```no_run
//! use graphormer::{ForwardMode, GraphBatch, GraphormerConfig, GraphormerModel};
//! use ndarray::Array3;
//!
//! let config = GraphormerConfig::new(2, 3, 2, 8, 16);
//! let model = GraphormerModel::new(config).unwrap();
//!
//! let batch = GraphBatch::new(
//!     Array3::zeros((1, 3, 3)),     // node features
//!     Array3::zeros((1, 4, 4)),     // baseline attention bias, token at index 0
//!     Array3::ones((1, 3, 3)),      // shortest-path lengths
//! );
//! let hidden = model.forward(&batch, ForwardMode::Eval).unwrap();
//! assert_eq!(hidden.shape(), &[1, 4, 8]);
//! ```

pub mod analysis;
pub mod asg;
pub mod graphormer;
pub mod nn;
pub mod params;
pub mod runtime;
pub mod tensor;

pub use graphormer::{
    ForwardMode, GraphBatch, GraphormerConfig, GraphormerError, GraphormerModel, GraphormerOutput,
};
pub use params::ParameterStore;
