//! Model configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("hidden_dim ({hidden_dim}) must be divisible by num_heads ({num_heads})")]
    HeadsDoNotDivideHidden { hidden_dim: usize, num_heads: usize },

    #[error("'{0}' must be greater than zero")]
    ZeroDimension(&'static str),

    #[error("'{name}' must be in [0, 1), got {value}")]
    InvalidDropout { name: &'static str, value: f32 },

    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_dropout() -> f32 {
    0.1
}

fn default_multi_hop_max_dist() -> usize {
    20
}

/// Hyperparameters of a [`GraphormerModel`](super::GraphormerModel).
///
/// The four `use_*` switches decide which optional structural tables exist.
/// A switched-off channel has no parameters and no graph input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphormerConfig {
    pub n_layers: usize,
    pub num_node_feat: usize,
    pub num_heads: usize,
    pub hidden_dim: usize,
    pub ffn_dim: usize,
    #[serde(default)]
    pub use_num_spd: bool,
    #[serde(default)]
    pub use_cnb_jac: bool,
    #[serde(default)]
    pub use_cnb_aa: bool,
    #[serde(default)]
    pub use_degree: bool,
    #[serde(default = "default_dropout")]
    pub dropout_rate: f32,
    #[serde(default = "default_dropout")]
    pub input_dropout_rate: f32,
    #[serde(default = "default_dropout")]
    pub attention_dropout_rate: f32,
    /// Kept for configuration compatibility; multi-hop edge biasing is not built.
    #[serde(default = "default_multi_hop_max_dist")]
    pub multi_hop_max_dist: usize,
}

impl GraphormerConfig {
    /// Configuration with every optional channel off and default dropout rates.
    pub fn new(n_layers: usize, num_node_feat: usize, num_heads: usize, hidden_dim: usize, ffn_dim: usize) -> Self {
        Self {
            n_layers,
            num_node_feat,
            num_heads,
            hidden_dim,
            ffn_dim,
            use_num_spd: false,
            use_cnb_jac: false,
            use_cnb_aa: false,
            use_degree: false,
            dropout_rate: default_dropout(),
            input_dropout_rate: default_dropout(),
            attention_dropout_rate: default_dropout(),
            multi_hop_max_dist: default_multi_hop_max_dist(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_num_spd(mut self, enabled: bool) -> Self {
        self.use_num_spd = enabled;
        self
    }

    pub fn with_cnb_jac(mut self, enabled: bool) -> Self {
        self.use_cnb_jac = enabled;
        self
    }

    pub fn with_cnb_aa(mut self, enabled: bool) -> Self {
        self.use_cnb_aa = enabled;
        self
    }

    pub fn with_degree(mut self, enabled: bool) -> Self {
        self.use_degree = enabled;
        self
    }

    /// Sets the residual, input and attention dropout rates.
    pub fn with_dropout(mut self, dropout_rate: f32, input_dropout_rate: f32, attention_dropout_rate: f32) -> Self {
        self.dropout_rate = dropout_rate;
        self.input_dropout_rate = input_dropout_rate;
        self.attention_dropout_rate = attention_dropout_rate;
        self
    }

    /// Sets every dropout rate to zero.
    pub fn without_dropout(self) -> Self {
        self.with_dropout(0.0, 0.0, 0.0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("num_node_feat", self.num_node_feat),
            ("num_heads", self.num_heads),
            ("hidden_dim", self.hidden_dim),
            ("ffn_dim", self.ffn_dim),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDimension(name));
            }
        }
        if self.hidden_dim % self.num_heads != 0 {
            return Err(ConfigError::HeadsDoNotDivideHidden {
                hidden_dim: self.hidden_dim,
                num_heads: self.num_heads,
            });
        }
        for (name, value) in [
            ("dropout_rate", self.dropout_rate),
            ("input_dropout_rate", self.input_dropout_rate),
            ("attention_dropout_rate", self.attention_dropout_rate),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::InvalidDropout { name, value });
            }
        }
        Ok(())
    }

    /// Names of the enabled optional channels, for logging.
    pub fn enabled_channels(&self) -> Vec<&'static str> {
        [
            ("num_spd", self.use_num_spd),
            ("cnb_jac", self.use_cnb_jac),
            ("cnb_aa", self.use_cnb_aa),
            ("degree", self.use_degree),
        ]
        .into_iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| name)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let config = GraphormerConfig::from_json(
            r#"{"n_layers": 2, "num_node_feat": 5, "num_heads": 4, "hidden_dim": 16, "ffn_dim": 32, "use_cnb_aa": true}"#,
        )
        .unwrap();
        assert_eq!(config.dropout_rate, 0.1);
        assert_eq!(config.input_dropout_rate, 0.1);
        assert_eq!(config.attention_dropout_rate, 0.1);
        assert_eq!(config.multi_hop_max_dist, 20);
        assert!(config.use_cnb_aa);
        assert!(!config.use_degree);
        assert_eq!(config.enabled_channels(), vec!["cnb_aa"]);
    }

    #[test]
    fn test_heads_must_divide_hidden() {
        let err = GraphormerConfig::new(1, 3, 3, 8, 16).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::HeadsDoNotDivideHidden { hidden_dim: 8, num_heads: 3 }
        ));
    }

    #[test]
    fn test_rejects_zero_dims_and_bad_dropout() {
        assert!(matches!(
            GraphormerConfig::new(1, 3, 0, 8, 16).validate(),
            Err(ConfigError::ZeroDimension("num_heads"))
        ));
        assert!(matches!(
            GraphormerConfig::new(1, 3, 2, 8, 16).with_dropout(0.1, 1.0, 0.1).validate(),
            Err(ConfigError::InvalidDropout { name: "input_dropout_rate", .. })
        ));
        assert!(GraphormerConfig::new(0, 3, 2, 8, 16).without_dropout().validate().is_ok());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            GraphormerConfig::from_json("{\"n_layers\": 2}"),
            Err(ConfigError::Json(_))
        ));
    }
}
