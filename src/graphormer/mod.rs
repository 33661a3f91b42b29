//! Graphormer: a transformer encoder over graphs.
//!
//! Structure enters through attention. Shortest-path lengths (and, when
//! enabled, path counts and neighbourhood similarity scores) are bucketed,
//! embedded per head and added to the attention scores. A virtual graph token
//! sits at position 0 of every sequence and attends to all nodes.
//!
//! ```ignore
//! use graphormer::graphormer::{ForwardMode, GraphBatch, GraphormerConfig, GraphormerModel};
//!
//! let config = GraphormerConfig::new(4, 9, 8, 64, 128).with_degree(true);
//! let model = GraphormerModel::new(config)?;
//! let hidden = model.forward(&batch, ForwardMode::Eval)?; // [n_graph, n_node + 1, 64]
//! ```

pub mod batch;
pub mod config;
pub mod model;
pub mod structural;

pub use batch::{BatchError, GraphBatch};
pub use config::{ConfigError, GraphormerConfig};
pub use model::{ForwardMode, GraphormerError, GraphormerModel, GraphormerOutput};
pub use structural::{
    ChannelEncoder, DegreeEncoder, StructuralChannel, StructuralEncoder, NUM_DEGREE_BUCKETS,
    NUM_SPATIAL_BUCKETS,
};
