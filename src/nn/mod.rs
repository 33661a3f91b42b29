//! # Neural Network Layers Module
//!
//! Building blocks for the encoder.
//!
//! In the graph-based architecture, each "layer" is a constructor that adds
//! a specific pattern of nodes (operations and parameters) to the ASG.
//! Parameter values live outside the graph, in a
//! [`ParameterStore`](crate::params::ParameterStore); every layer knows how
//! to fill its share of the store with default values.
//!
//! ## Available Layers
//!
//! - [`Linear`]: fully connected layer
//! - [`Embedding`]: lookup table with an optional zeroed padding row
//! - [`LayerNorm`]: layer normalization
//! - [`GELU`]: activation
//! - [`Dropout`]: inverted dropout, active only on a training backend
//! - [`MultiHeadAttention`]: attention with an additive score bias
//! - [`FeedForward`]: position-wise feed-forward network
//! - [`EncoderLayer`]: pre-norm encoder layer
//!
//! ## Example
//!
//! ```ignore
//! use graphormer::nn::{Linear, GELU, Module};
//! use graphormer::tensor::{GraphContext, Tensor};
//!
//! let ctx = Rc::new(RefCell::new(GraphContext::new()));
//! let linear = Linear::new(&ctx, 784, 128, "fc1");
//!
//! let x = Tensor::new_input(&ctx, "input");
//! let h = GELU.forward(&linear.forward(&x));
//! ```

pub mod activations;
pub mod attention;
pub mod dropout;
pub mod embedding;
pub mod feedforward;
pub mod linear;
pub mod module;
pub mod norm;
pub mod transformer;

pub use activations::GELU;
pub use attention::{AttentionOutput, MultiHeadAttention};
pub use dropout::Dropout;
pub use embedding::Embedding;
pub use feedforward::FeedForward;
pub use linear::Linear;
pub use norm::LayerNorm;
pub use transformer::EncoderLayer;

pub use module::Module;
