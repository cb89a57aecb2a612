use std::{
    error::Error,
    fmt::{self, Display},
    fs, io,
    path::Path,
};

use serde::{Deserialize, Serialize};
use training::{
    AggregationMethod, ComputeGradientsOptions, GateGradients, GradientDescentOptimizer,
    MomentumOptimizer, Optimizer,
};

/// The configuration module's error type.
#[derive(Debug)]
pub enum ConfigErr {
    Io(io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::Io(e) => write!(f, "cannot read the config: {e}"),
            ConfigErr::Json(e) => write!(f, "invalid JSON: {e}"),
            ConfigErr::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigErr::Io(e) => Some(e),
            ConfigErr::Json(e) => Some(e),
            ConfigErr::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for ConfigErr {
    fn from(value: io::Error) -> Self {
        ConfigErr::Io(value)
    }
}

impl From<serde_json::Error> for ConfigErr {
    fn from(value: serde_json::Error) -> Self {
        ConfigErr::Json(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    GradientDescent {
        learning_rate: f32,
    },
    Momentum {
        learning_rate: f32,
        momentum: f32,
        #[serde(default)]
        nesterov: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateConfig {
    None,
    #[default]
    Op,
    Graph,
}

impl From<GateConfig> for GateGradients {
    fn from(value: GateConfig) -> Self {
        match value {
            GateConfig::None => GateGradients::GateNone,
            GateConfig::Op => GateGradients::GateOp,
            GateConfig::Graph => GateGradients::GateGraph,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationConfig {
    #[default]
    AddN,
    Tree,
    AccumulateN,
}

impl From<AggregationConfig> for AggregationMethod {
    fn from(value: AggregationConfig) -> Self {
        match value {
            AggregationConfig::AddN => AggregationMethod::AddN,
            AggregationConfig::Tree => AggregationMethod::ExperimentalTree,
            AggregationConfig::AccumulateN => AggregationMethod::ExperimentalAccumulateN,
        }
    }
}

/// The synthetic linear regression problem, `y = x . w + b + noise`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub samples: usize,
    pub features: usize,
    /// The standard deviation of the gaussian noise added to the targets.
    pub noise: f32,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            samples: 256,
            features: 3,
            noise: 0.01,
        }
    }
}

/// A training run's configuration.
///
/// Missing fields take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub optimizer: OptimizerConfig,
    pub use_locking: bool,
    /// Whether the model's variables are resource variables.
    pub resource_variables: bool,
    pub gate_gradients: GateConfig,
    pub aggregation_method: AggregationConfig,
    pub steps: usize,
    /// Logs the loss every `log_interval` steps.
    pub log_interval: usize,
    pub seed: Option<u64>,
    pub dataset: DatasetConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::GradientDescent { learning_rate: 0.1 },
            use_locking: false,
            resource_variables: false,
            gate_gradients: GateConfig::default(),
            aggregation_method: AggregationConfig::default(),
            steps: 500,
            log_interval: 50,
            seed: None,
            dataset: DatasetConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Loads and validates a `TrainConfig` from a JSON file.
    ///
    /// # Errors
    /// Returns a `ConfigErr` if the file cannot be read, parsed or holds
    /// invalid values.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigErr> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses and validates a `TrainConfig` out of a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigErr> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigErr> {
        let invalid = |msg: &str| Err(ConfigErr::Invalid(msg.to_string()));

        let (learning_rate, momentum) = match self.optimizer {
            OptimizerConfig::GradientDescent { learning_rate } => (learning_rate, 0.0),
            OptimizerConfig::Momentum {
                learning_rate,
                momentum,
                ..
            } => (learning_rate, momentum),
        };

        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return invalid("learning_rate must be a positive number");
        }
        if !(0.0..1.0).contains(&momentum) {
            return invalid("momentum must be in [0, 1)");
        }
        if self.steps == 0 {
            return invalid("steps must not be zero");
        }
        if self.log_interval == 0 {
            return invalid("log_interval must not be zero");
        }
        if self.dataset.samples == 0 || self.dataset.features == 0 {
            return invalid("the dataset must have at least one sample and one feature");
        }
        if !self.dataset.noise.is_finite() || self.dataset.noise < 0.0 {
            return invalid("noise must be a non negative number");
        }

        Ok(())
    }

    /// Builds the configured optimizer.
    pub fn optimizer(&self) -> Box<dyn Optimizer> {
        match self.optimizer {
            OptimizerConfig::GradientDescent { learning_rate } => {
                Box::new(GradientDescentOptimizer::new(learning_rate, self.use_locking))
            }
            OptimizerConfig::Momentum {
                learning_rate,
                momentum,
                nesterov,
            } => Box::new(MomentumOptimizer::new(
                learning_rate,
                momentum,
                self.use_locking,
                nesterov,
            )),
        }
    }

    pub fn gradient_options(&self) -> ComputeGradientsOptions {
        ComputeGradientsOptions {
            gate_gradients: self.gate_gradients.into(),
            aggregation_method: self.aggregation_method.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = TrainConfig::from_json(r#"{ "steps": 10 }"#).unwrap();
        assert_eq!(config.steps, 10);
        assert_eq!(config.dataset, DatasetConfig::default());
        assert_eq!(config.gate_gradients, GateConfig::Op);
    }

    #[test]
    fn test_momentum_config_is_parsed() {
        let json = r#"{
            "optimizer": { "kind": "momentum", "learning_rate": 0.05, "momentum": 0.9 },
            "use_locking": true,
            "gate_gradients": "graph",
            "aggregation_method": "tree"
        }"#;
        let config = TrainConfig::from_json(json).unwrap();

        assert_eq!(
            config.optimizer,
            OptimizerConfig::Momentum {
                learning_rate: 0.05,
                momentum: 0.9,
                nesterov: false
            }
        );
        let options = config.gradient_options();
        assert_eq!(options.gate_gradients, GateGradients::GateGraph);
        assert_eq!(options.aggregation_method, AggregationMethod::ExperimentalTree);

        let optimizer = config.optimizer();
        assert_eq!(optimizer.name(), "Momentum");
        assert!(optimizer.use_locking());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for json in [
            r#"{ "steps": 0 }"#,
            r#"{ "optimizer": { "kind": "gradient_descent", "learning_rate": -1.0 } }"#,
            r#"{ "optimizer": { "kind": "momentum", "learning_rate": 0.1, "momentum": 1.5 } }"#,
            r#"{ "dataset": { "samples": 0, "features": 1, "noise": 0.0 } }"#,
        ] {
            let err = TrainConfig::from_json(json).unwrap_err();
            assert!(matches!(err, ConfigErr::Invalid(_)), "{json}: {err}");
        }
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = TrainConfig::from_json(r#"{ "epochs": 3 }"#).unwrap_err();
        assert!(matches!(err, ConfigErr::Json(_)));
    }
}
