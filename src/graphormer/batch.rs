//! Batched graph inputs.

use super::config::GraphormerConfig;
use super::structural::StructuralChannel;
use ndarray::{Array2, Array3, ArrayD};

/// One forward call's worth of padded graphs.
///
/// `n_graph` graphs padded to `n_node` nodes each. Index 0 of both
/// trailing axes of `attn_bias` is reserved for the graph token.
#[derive(Debug, Clone)]
pub struct GraphBatch {
    /// Node features, `[n_graph, n_node, num_node_feat]`.
    pub x: Array3<f32>,
    /// Baseline attention bias, `[n_graph, n_node + 1, n_node + 1]`.
    pub attn_bias: Array3<f32>,
    /// Shortest-path hop counts, `[n_graph, n_node, n_node]`.
    pub len_shortest_path: Array3<i64>,
    pub num_shortest_path: Option<Array3<i64>>,
    pub undir_jac: Option<Array3<f32>>,
    pub undir_aa: Option<Array3<f32>>,
    /// `[n_graph, n_node]`.
    pub in_degree: Option<Array2<i64>>,
    /// `[n_graph, n_node]`.
    pub out_degree: Option<Array2<i64>>,
}

impl GraphBatch {
    pub fn new(x: Array3<f32>, attn_bias: Array3<f32>, len_shortest_path: Array3<i64>) -> Self {
        Self {
            x,
            attn_bias,
            len_shortest_path,
            num_shortest_path: None,
            undir_jac: None,
            undir_aa: None,
            in_degree: None,
            out_degree: None,
        }
    }

    pub fn with_num_shortest_path(mut self, num_shortest_path: Array3<i64>) -> Self {
        self.num_shortest_path = Some(num_shortest_path);
        self
    }

    pub fn with_undir_jac(mut self, undir_jac: Array3<f32>) -> Self {
        self.undir_jac = Some(undir_jac);
        self
    }

    pub fn with_undir_aa(mut self, undir_aa: Array3<f32>) -> Self {
        self.undir_aa = Some(undir_aa);
        self
    }

    pub fn with_degrees(mut self, in_degree: Array2<i64>, out_degree: Array2<i64>) -> Self {
        self.in_degree = Some(in_degree);
        self.out_degree = Some(out_degree);
        self
    }

    pub fn n_graph(&self) -> usize {
        self.x.shape()[0]
    }

    pub fn n_node(&self) -> usize {
        self.x.shape()[1]
    }

    /// Raw matrix of a pairwise channel as graph input data, if present.
    pub fn channel_data(&self, channel: StructuralChannel) -> Option<ArrayD<f32>> {
        match channel {
            StructuralChannel::ShortestPathLength => Some(as_f32(&self.len_shortest_path)),
            StructuralChannel::NumShortestPaths => self.num_shortest_path.as_ref().map(as_f32),
            StructuralChannel::Jaccard => self.undir_jac.clone().map(|a| a.into_dyn()),
            StructuralChannel::AdamicAdar => self.undir_aa.clone().map(|a| a.into_dyn()),
        }
    }

    /// Checks shapes against `config` and that every enabled channel has data.
    pub fn validate(&self, config: &GraphormerConfig) -> Result<(), BatchError> {
        let (n_graph, n_node) = (self.n_graph(), self.n_node());

        if self.x.shape()[2] != config.num_node_feat {
            return Err(BatchError::Shape {
                input: "x",
                expected: vec![n_graph, n_node, config.num_node_feat],
                actual: self.x.shape().to_vec(),
            });
        }
        check_shape("attn_bias", self.attn_bias.shape(), &[n_graph, n_node + 1, n_node + 1])?;

        let pair = [n_graph, n_node, n_node];
        check_shape("len_shortest_path", self.len_shortest_path.shape(), &pair)?;

        let channels: [(&'static str, bool, Option<&[usize]>); 3] = [
            ("num_shortest_path", config.use_num_spd, self.num_shortest_path.as_ref().map(|a| a.shape())),
            ("undir_jac", config.use_cnb_jac, self.undir_jac.as_ref().map(|a| a.shape())),
            ("undir_aa", config.use_cnb_aa, self.undir_aa.as_ref().map(|a| a.shape())),
        ];
        for (name, enabled, shape) in channels {
            if !enabled {
                continue;
            }
            match shape {
                Some(shape) => check_shape(name, shape, &pair)?,
                None => return Err(BatchError::MissingChannel(name)),
            }
        }

        if config.use_degree {
            let nodes = [n_graph, n_node];
            match &self.in_degree {
                Some(a) => check_shape("in_degree", a.shape(), &nodes)?,
                None => return Err(BatchError::MissingChannel("in_degree")),
            }
            match &self.out_degree {
                Some(a) => check_shape("out_degree", a.shape(), &nodes)?,
                None => return Err(BatchError::MissingChannel("out_degree")),
            }
        }
        Ok(())
    }

    /// Names of inputs carried for channels `config` leaves disabled.
    pub fn unused_channels(&self, config: &GraphormerConfig) -> Vec<&'static str> {
        let mut unused = Vec::new();
        if !config.use_num_spd && self.num_shortest_path.is_some() {
            unused.push("num_shortest_path");
        }
        if !config.use_cnb_jac && self.undir_jac.is_some() {
            unused.push("undir_jac");
        }
        if !config.use_cnb_aa && self.undir_aa.is_some() {
            unused.push("undir_aa");
        }
        if !config.use_degree {
            if self.in_degree.is_some() {
                unused.push("in_degree");
            }
            if self.out_degree.is_some() {
                unused.push("out_degree");
            }
        }
        unused
    }
}

/// Problems with a [`GraphBatch`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("input '{input}' has shape {actual:?}, expected {expected:?}")]
    Shape {
        input: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("input '{0}' is required by the model configuration but missing from the batch")]
    MissingChannel(&'static str),
}

fn check_shape(input: &'static str, actual: &[usize], expected: &[usize]) -> Result<(), BatchError> {
    if actual != expected {
        return Err(BatchError::Shape {
            input,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

pub(crate) fn as_f32<D: ndarray::Dimension>(a: &ndarray::Array<i64, D>) -> ArrayD<f32> {
    a.mapv(|v| v as f32).into_dyn()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n_graph: usize, n_node: usize, feat: usize) -> GraphBatch {
        GraphBatch::new(
            Array3::zeros((n_graph, n_node, feat)),
            Array3::zeros((n_graph, n_node + 1, n_node + 1)),
            Array3::zeros((n_graph, n_node, n_node)),
        )
    }

    #[test]
    fn test_valid_minimal_batch() {
        let config = GraphormerConfig::new(1, 3, 2, 8, 16);
        assert!(batch(2, 4, 3).validate(&config).is_ok());
    }

    #[test]
    fn test_shape_mismatch() {
        let config = GraphormerConfig::new(1, 3, 2, 8, 16);
        let mut b = batch(1, 3, 3);
        b.attn_bias = Array3::zeros((1, 3, 3));
        assert_eq!(
            b.validate(&config),
            Err(BatchError::Shape {
                input: "attn_bias",
                expected: vec![1, 4, 4],
                actual: vec![1, 3, 3],
            })
        );
        assert!(matches!(batch(1, 3, 5).validate(&config), Err(BatchError::Shape { input: "x", .. })));
    }

    #[test]
    fn test_enabled_channel_requires_data() {
        let config = GraphormerConfig::new(1, 3, 2, 8, 16).with_cnb_jac(true).with_degree(true);
        let b = batch(1, 3, 3);
        assert_eq!(b.validate(&config), Err(BatchError::MissingChannel("undir_jac")));

        let b = b.with_undir_jac(Array3::zeros((1, 3, 3)));
        assert_eq!(b.validate(&config), Err(BatchError::MissingChannel("in_degree")));

        let b = b.with_degrees(Array2::zeros((1, 3)), Array2::zeros((1, 3)));
        assert!(b.validate(&config).is_ok());
    }

    #[test]
    fn test_unused_channels_reported() {
        let config = GraphormerConfig::new(1, 3, 2, 8, 16);
        let b = batch(1, 3, 3)
            .with_undir_aa(Array3::zeros((1, 3, 3)))
            .with_degrees(Array2::zeros((1, 3)), Array2::zeros((1, 3)));
        assert_eq!(b.unused_channels(&config), vec!["undir_aa", "in_degree", "out_degree"]);
        assert!(b.validate(&config).is_ok());
        assert!(b.channel_data(StructuralChannel::AdamicAdar).is_some());
        assert!(b.channel_data(StructuralChannel::NumShortestPaths).is_none());
    }
}
